//! Whole-buffer reads and writes on block devices and image files.
//!
//! Short transfers are continued and `Interrupted`/`WouldBlock` are retried; a read that returns no
//! bytes before the buffer is full is reported as `UnexpectedEof`.

use std::io::{self, Read, Seek, SeekFrom, Write};

use log::debug;

fn can_retry(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock
    )
}

/// Fills `buf` completely from `reader`.
pub fn read_till_finish<R: Read + ?Sized>(reader: &mut R, buf: &mut [u8]) -> io::Result<()> {
    let mut done = 0;
    while done < buf.len() {
        match reader.read(&mut buf[done..]) {
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("read stopped after {} of {} bytes", done, buf.len()),
                ))
            }
            Ok(n) => done += n,
            Err(e) if can_retry(&e) => debug!("retrying read after {}", e),
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Writes all of `buf` to `writer`.
pub fn write_till_finish<W: Write + ?Sized>(writer: &mut W, buf: &[u8]) -> io::Result<()> {
    let mut done = 0;
    while done < buf.len() {
        match writer.write(&buf[done..]) {
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::WriteZero,
                    format!("write stopped after {} of {} bytes", done, buf.len()),
                ))
            }
            Ok(n) => done += n,
            Err(e) if can_retry(&e) => debug!("retrying write after {}", e),
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Reads `len` bytes at `offset`.
pub fn read_at<F: Read + Seek + ?Sized>(file: &mut F, offset: u64, len: usize) -> io::Result<Vec<u8>> {
    file.seek(SeekFrom::Start(offset))?;
    let mut buf = vec![0u8; len];
    read_till_finish(file, &mut buf)?;
    Ok(buf)
}

/// Writes `buf` at `offset` and flushes.
pub fn write_at<F: Write + Seek + ?Sized>(file: &mut F, offset: u64, buf: &[u8]) -> io::Result<()> {
    file.seek(SeekFrom::Start(offset))?;
    write_till_finish(file, buf)?;
    file.flush()
}
