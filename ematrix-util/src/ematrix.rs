use std::collections::HashMap;
use std::io::BufRead;

use ndarray::{Array2, ArrayView1};

use crate::common_io::{basename, open_buf_reader};
use crate::error::EMatrixError;

/// Element-wise transformation applied while loading an expression
/// matrix. Log transforms of values `<= 0` yield `NaN`, which marks the
/// cell missing from then on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transform {
    None,
    Log,
    Log2,
    Log10,
}

impl Transform {
    pub fn from_name(name: &str) -> Result<Self, EMatrixError> {
        match name {
            "none" | "" => Ok(Transform::None),
            "log" => Ok(Transform::Log),
            "log2" => Ok(Transform::Log2),
            "log10" => Ok(Transform::Log10),
            _ => Err(EMatrixError::UnknownTransform(name.to_string())),
        }
    }

    fn apply(&self, value: f64) -> f64 {
        match self {
            Transform::None => value,
            Transform::Log => value.ln(),
            Transform::Log2 => value.log2(),
            Transform::Log10 => value.log10(),
        }
    }
}

/// Loader options for [`EMatrix::from_file`]. `rows` counts every line of
/// the file including the header line if `headers` is set; `cols` counts
/// the fields of a data row (gene name plus one field per sample).
#[derive(Debug, Clone)]
pub struct LoadOpts {
    pub rows: usize,
    pub cols: usize,
    pub headers: bool,
    pub omit_na: bool,
    pub na_val: Option<Box<str>>,
    pub transform: Transform,
}

/// Dense gene-by-sample expression matrix. Missing cells are stored as
/// `NaN`; every other cell is finite. Immutable once loaded.
#[derive(Debug)]
pub struct EMatrix {
    data: Array2<f64>,
    gene_names: Vec<Box<str>>,
    sample_names: Option<Vec<Box<str>>>,
    name_to_row: HashMap<Box<str>, usize>,
    file_prefix: Box<str>,
}

impl EMatrix {
    /// Parse a whitespace-delimited expression matrix file (`.gz` is
    /// fine). The first field of each data row is the gene name; the
    /// header line, when present, carries sample names only.
    pub fn from_file(input_file: &str, opts: &LoadOpts) -> anyhow::Result<Self> {
        let n_header = if opts.headers { 1 } else { 0 };
        if opts.rows <= n_header {
            return Err(EMatrixError::InvalidMatrixShape(format!(
                "declared {} rows leave no data rows",
                opts.rows
            ))
            .into());
        }
        if opts.cols < 2 {
            return Err(EMatrixError::InvalidMatrixShape(format!(
                "declared {} columns leave no sample columns",
                opts.cols
            ))
            .into());
        }

        let num_genes = opts.rows - n_header;
        let num_samples = opts.cols - 1;

        let na_token = if opts.omit_na {
            opts.na_val.as_deref()
        } else {
            None
        };

        let reader = open_buf_reader(input_file)?;
        let mut lines = reader.lines();

        let sample_names = if opts.headers {
            let hdr = match lines.next() {
                Some(x) => x?,
                None => {
                    return Err(EMatrixError::InvalidMatrixShape(
                        "empty file, expected a header line".to_string(),
                    )
                    .into())
                }
            };
            let names: Vec<Box<str>> = hdr
                .split_whitespace()
                .map(|x| x.to_string().into_boxed_str())
                .collect();
            if names.len() != num_samples {
                return Err(EMatrixError::InvalidMatrixShape(format!(
                    "header has {} fields, expected {} sample names",
                    names.len(),
                    num_samples
                ))
                .into());
            }
            Some(names)
        } else {
            None
        };

        let mut data = Array2::<f64>::zeros((num_genes, num_samples));
        let mut gene_names = Vec::with_capacity(num_genes);
        let mut name_to_row: HashMap<Box<str>, usize> = HashMap::with_capacity(num_genes);

        let mut g = 0usize;
        for line in lines {
            let line = line?;
            if g >= num_genes {
                return Err(EMatrixError::InvalidMatrixShape(format!(
                    "more than {} data rows in file",
                    num_genes
                ))
                .into());
            }

            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() != opts.cols {
                return Err(EMatrixError::InvalidMatrixShape(format!(
                    "row {} has {} fields, expected {}",
                    g + n_header + 1,
                    fields.len(),
                    opts.cols
                ))
                .into());
            }

            let name: Box<str> = fields[0].to_string().into_boxed_str();
            if name_to_row.insert(name.clone(), g).is_some() {
                return Err(EMatrixError::InvalidMatrixShape(format!(
                    "duplicate gene name '{}'",
                    name
                ))
                .into());
            }
            gene_names.push(name);

            for (s, field) in fields[1..].iter().enumerate() {
                data[(g, s)] = parse_cell(field, na_token, opts.transform)?;
            }
            g += 1;
        }

        if g != num_genes {
            return Err(EMatrixError::InvalidMatrixShape(format!(
                "found {} data rows, expected {}",
                g, num_genes
            ))
            .into());
        }

        Ok(EMatrix {
            data,
            gene_names,
            sample_names,
            name_to_row,
            file_prefix: basename(input_file)?,
        })
    }

    pub fn num_genes(&self) -> usize {
        self.data.nrows()
    }

    pub fn num_samples(&self) -> usize {
        self.data.ncols()
    }

    /// One gene's expression values across all samples (`NaN` = missing).
    pub fn row(&self, j: usize) -> ArrayView1<f64> {
        self.data.row(j)
    }

    pub fn gene_name(&self, j: usize) -> &str {
        &self.gene_names[j]
    }

    pub fn gene_names(&self) -> &[Box<str>] {
        &self.gene_names
    }

    pub fn sample_names(&self) -> Option<&[Box<str>]> {
        self.sample_names.as_deref()
    }

    /// Row index of a gene name, if present.
    pub fn gene_index(&self, name: &str) -> Option<usize> {
        self.name_to_row.get(name).copied()
    }

    /// Basename of the input file; all derived output names start here.
    pub fn file_prefix(&self) -> &str {
        &self.file_prefix
    }
}

/// Parse one matrix cell. The missing-value token matches exactly and
/// case-sensitively; anything else must parse to a finite number.
fn parse_cell(
    field: &str,
    na_token: Option<&str>,
    transform: Transform,
) -> Result<f64, EMatrixError> {
    if let Some(token) = na_token {
        if field == token {
            return Ok(f64::NAN);
        }
    }

    match field.parse::<f64>() {
        Ok(v) if v.is_finite() => {
            let v = transform.apply(v);
            // log of a non-positive value is marked missing
            Ok(if v.is_finite() { v } else { f64::NAN })
        }
        _ => Err(EMatrixError::MissingValueNotConfigured(field.to_string())),
    }
}
