use anyhow::Context;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::fs::File;
use std::io::{BufReader, BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use ematrix_util::similarity::SimilarityMethod;

use crate::error::PipelineError;

/// Rows of the lower triangle stored per binary block file.
pub const ROWS_PER_OUTPUT_FILE: usize = 10_000;

fn tri(n: u64) -> u64 {
    n * (n + 1) / 2
}

/// Block layout of the on-disk lower triangle. Every piece of offset
/// and naming arithmetic lives here and nowhere else.
#[derive(Debug, Clone, Copy)]
pub struct BlockLayout {
    pub num_genes: usize,
    pub rows_per_block: usize,
}

impl BlockLayout {
    pub fn new(num_genes: usize) -> Self {
        Self::with_rows_per_block(num_genes, ROWS_PER_OUTPUT_FILE)
    }

    pub fn with_rows_per_block(num_genes: usize, rows_per_block: usize) -> Self {
        BlockLayout {
            num_genes,
            rows_per_block,
        }
    }

    pub fn num_blocks(&self) -> usize {
        self.num_genes.div_ceil(self.rows_per_block)
    }

    pub fn block_of_row(&self, j: usize) -> usize {
        j / self.rows_per_block
    }

    /// First row and row count of block `b`; the last block may be short.
    pub fn block_rows(&self, b: usize) -> (usize, usize) {
        let r0 = b * self.rows_per_block;
        let rows = self.rows_per_block.min(self.num_genes - r0);
        (r0, rows)
    }

    /// Byte offset of row `j`'s first score inside a block starting at
    /// `r0`: 8 header bytes plus 4 bytes for each score of the rows
    /// before `j`, row `j'` holding `j' + 1` scores.
    pub fn row_offset(&self, r0: usize, j: usize) -> u64 {
        8 + 4 * (tri(j as u64) - tri(r0 as u64))
    }

    /// Expected byte length of block `b` when complete.
    pub fn block_bytes(&self, b: usize) -> u64 {
        let (r0, rows) = self.block_rows(b);
        self.row_offset(r0, r0 + rows)
    }
}

/// Path of one block file: `<dir>/<Method>/<prefix>.<code><index>.bin`.
pub fn block_path(dir: &Path, prefix: &str, method: SimilarityMethod, index: usize) -> PathBuf {
    dir.join(method.dir_name())
        .join(format!("{}.{}{}.bin", prefix, method.code(), index))
}

/// Writer for one block file. Create writes the header; exactly the
/// declared number of rows must follow, in ascending order, before
/// `finish`.
pub struct SimBlockWriter {
    out: BufWriter<File>,
    path: PathBuf,
    row_start: usize,
    row_next: usize,
    row_end: usize,
}

impl SimBlockWriter {
    pub fn create(path: &Path, num_genes: usize, r0: usize, num_rows: usize) -> anyhow::Result<Self> {
        let file =
            File::create(path).with_context(|| format!("creating {}", path.display()))?;
        let mut out = BufWriter::new(file);
        out.write_i32::<LittleEndian>(num_genes as i32)?;
        out.write_i32::<LittleEndian>(num_rows as i32)?;
        Ok(SimBlockWriter {
            out,
            path: path.to_owned(),
            row_start: r0,
            row_next: r0,
            row_end: r0 + num_rows,
        })
    }

    /// Append row `j`: its `j + 1` scores for columns `0..=j`.
    pub fn write_row(&mut self, row: &[f32]) -> anyhow::Result<()> {
        if self.row_next >= self.row_end {
            anyhow::bail!("block {} already holds all its rows", self.path.display());
        }
        if row.len() != self.row_next + 1 {
            anyhow::bail!(
                "row {} needs {} scores, got {}",
                self.row_next,
                self.row_next + 1,
                row.len()
            );
        }
        for &v in row {
            self.out.write_f32::<LittleEndian>(v)?;
        }
        self.row_next += 1;
        Ok(())
    }

    pub fn finish(mut self) -> anyhow::Result<()> {
        if self.row_next != self.row_end {
            anyhow::bail!(
                "block {} closed after {} of {} rows",
                self.path.display(),
                self.row_next - self.row_start,
                self.row_end - self.row_start
            );
        }
        self.out.flush()?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Random and streaming access to one method's stored lower triangle.
pub struct SimMatrixReader {
    dir: PathBuf,
    prefix: Box<str>,
    method: SimilarityMethod,
    layout: BlockLayout,
}

impl SimMatrixReader {
    pub fn new(dir: &Path, prefix: &str, method: SimilarityMethod, layout: BlockLayout) -> Self {
        SimMatrixReader {
            dir: dir.to_owned(),
            prefix: prefix.to_string().into_boxed_str(),
            method,
            layout,
        }
    }

    pub fn layout(&self) -> &BlockLayout {
        &self.layout
    }

    pub fn block_file(&self, b: usize) -> PathBuf {
        block_path(&self.dir, &self.prefix, self.method, b)
    }

    /// Open block `b`, validate its header against the layout and its
    /// byte length against the declared row count.
    fn open_block(&self, b: usize) -> anyhow::Result<(BufReader<File>, usize, usize)> {
        let path = self.block_file(b);
        let file = File::open(&path).with_context(|| format!("opening {}", path.display()))?;
        let found = file.metadata()?.len();

        let mut reader = BufReader::new(file);
        let g = reader.read_i32::<LittleEndian>()? as usize;
        let l = reader.read_i32::<LittleEndian>()? as usize;

        let (r0, rows) = self.layout.block_rows(b);
        if g != self.layout.num_genes {
            anyhow::bail!(
                "block {} declares {} genes, expected {}",
                path.display(),
                g,
                self.layout.num_genes
            );
        }
        if l != rows {
            anyhow::bail!(
                "block {} declares {} rows, expected {}",
                path.display(),
                l,
                rows
            );
        }

        let expected = 8 + 4 * (tri((r0 + l) as u64) - tri(r0 as u64));
        if found != expected {
            return Err(PipelineError::TruncatedBlock {
                path,
                expected,
                found,
            }
            .into());
        }

        Ok((reader, r0, rows))
    }

    /// Fetch s(a, b); the larger index selects the row of the stored
    /// lower triangle.
    pub fn cell(&self, a: usize, b: usize) -> anyhow::Result<f32> {
        let (row, col) = if a >= b { (a, b) } else { (b, a) };
        if row >= self.layout.num_genes {
            return Err(PipelineError::OutOfRange(a, b).into());
        }

        let blk = self.layout.block_of_row(row);
        let (mut reader, r0, _) = self.open_block(blk)?;

        let offset = self.layout.row_offset(r0, row) + 4 * col as u64;
        reader.seek(SeekFrom::Start(offset))?;
        Ok(reader.read_f32::<LittleEndian>()?)
    }

    /// Visit every stored cell in block order, rows ascending, columns
    /// ascending within a row.
    pub fn for_each_cell<F>(&self, mut visit: F) -> anyhow::Result<()>
    where
        F: FnMut(usize, usize, f32) -> anyhow::Result<()>,
    {
        for b in 0..self.layout.num_blocks() {
            let (mut reader, r0, rows) = self.open_block(b)?;
            for j in r0..r0 + rows {
                for k in 0..=j {
                    let v = reader.read_f32::<LittleEndian>()?;
                    visit(j, k, v)?;
                }
            }
        }
        Ok(())
    }
}

/// Remove any block files a failed run left behind.
pub fn remove_blocks(paths: &[PathBuf]) {
    for p in paths {
        let _ = std::fs::remove_file(p);
    }
}
