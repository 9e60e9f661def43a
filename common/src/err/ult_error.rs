use std::fmt::Display;
use std::num::ParseIntError;
use std::str::Utf8Error;
use std::string::FromUtf8Error;
use std::{fmt, io};

#[derive(Debug)]
pub enum UltError {
    //////////////////////
    // Common
    //////////////////////
    /// 一定不会出现的异常。如果出现，一定是BUG
    Bug(String),
    String(String),

    //////////////////////
    // Startup
    //////////////////////
    Config(String),

    //////////////////////
    // Binlog / state log
    //////////////////////
    /// event 编解码过程中的异常: 数据不完整、格式错误等
    Decode(String),
    Encode(String),

    //////////////////////
    // SQL
    //////////////////////
    Parse(String),
    Db(String),

    //////////////////////
    // IO
    //////////////////////
    IoError(io::Error),
    Utf8Error(Utf8Error),
    FromUtf8Error(FromUtf8Error),
    ParseIntError(ParseIntError),
    JsonError(serde_json::Error),
}

impl Display for UltError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> fmt::Result {
        match self {
            UltError::Bug(s)
            | UltError::String(s)
            | UltError::Config(s)
            | UltError::Decode(s)
            | UltError::Encode(s)
            | UltError::Parse(s)
            | UltError::Db(s) => {
                write!(f, "{}", s)
            }
            UltError::IoError(err) => {
                write!(f, "{}", err)
            }
            UltError::Utf8Error(err) => {
                write!(f, "{}", err)
            }
            UltError::FromUtf8Error(err) => {
                write!(f, "{}", err)
            }
            UltError::ParseIntError(err) => {
                write!(f, "{}", err)
            }
            UltError::JsonError(err) => {
                write!(f, "{}", err)
            }
        }
    }
}

impl std::error::Error for UltError {}

impl From<io::Error> for UltError {
    fn from(error: io::Error) -> Self {
        UltError::IoError(error)
    }
}

impl From<Utf8Error> for UltError {
    fn from(error: Utf8Error) -> Self {
        UltError::Utf8Error(error)
    }
}

impl From<FromUtf8Error> for UltError {
    fn from(error: FromUtf8Error) -> Self {
        UltError::FromUtf8Error(error)
    }
}

impl From<ParseIntError> for UltError {
    fn from(error: ParseIntError) -> Self {
        UltError::ParseIntError(error)
    }
}

impl From<serde_json::Error> for UltError {
    fn from(error: serde_json::Error) -> Self {
        UltError::JsonError(error)
    }
}

#[cfg(test)]
mod test {
    use super::UltError;

    #[test]
    fn test_display() {
        let err = UltError::Decode("event shorter than header".to_string());
        assert_eq!(format!("{}", err), "event shorter than header");

        let err: UltError = "42x".parse::<u64>().unwrap_err().into();
        assert!(matches!(err, UltError::ParseIntError(_)));
    }
}
