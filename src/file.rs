//! 원본/대상 파일 열기
//!
//! 세션이 프레임을 하나라도 주고받기 전에 파일 문제를 드러내기 위해
//! 드라이버가 먼저 호출한다.

use std::fs::File;
use std::io::{self, BufReader, BufWriter};
use std::path::Path;

use crate::{Error, Result, MAX_FILE_SIZE};

/// 파일 크기 조회
pub fn file_size<P: AsRef<Path>>(path: P) -> Result<u64> {
    Ok(std::fs::metadata(path)?.len())
}

/// 원본 파일 열기 (크기 검사 포함)
pub fn open_source<P: AsRef<Path>>(path: P) -> Result<(BufReader<File>, u64)> {
    let path = path.as_ref();
    let source_open = |source: io::Error| Error::SourceOpen {
        path: path.to_path_buf(),
        source,
    };

    let file = File::open(path).map_err(source_open)?;
    let metadata = file.metadata().map_err(source_open)?;
    if !metadata.is_file() {
        return Err(source_open(io::Error::new(
            io::ErrorKind::InvalidInput,
            "not a regular file",
        )));
    }

    let size = metadata.len();
    if size == 0 {
        return Err(Error::EmptySource);
    }
    if size > MAX_FILE_SIZE {
        return Err(Error::FileTooLarge {
            size,
            max: MAX_FILE_SIZE,
        });
    }

    Ok((BufReader::new(file), size))
}

/// 대상 파일 생성 (있으면 비움)
pub fn create_destination<P: AsRef<Path>>(path: P) -> Result<BufWriter<File>> {
    let path = path.as_ref();
    let file = File::create(path).map_err(|source| Error::DestinationOpen {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(BufWriter::new(file))
}
