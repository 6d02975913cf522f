use std::{fmt, process::ExitCode};

use crate::finality::FinalityError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexerError {
    /// Fatal error. Should not retry.
    Fatal,
    /// Configuration error. Should not retry.
    Configuration,
    /// Chain access error. Can retry.
    Provider,
    /// The indexed chain is no longer consistent with the node. Should not continue.
    Consistency,
}

pub type Result<T> = error_stack::Result<T, IndexerError>;

impl error_stack::Context for IndexerError {}

impl fmt::Display for IndexerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexerError::Fatal => f.write_str("indexer error: fatal"),
            IndexerError::Configuration => f.write_str("indexer error: configuration"),
            IndexerError::Provider => f.write_str("indexer error: provider"),
            IndexerError::Consistency => f.write_str("indexer error: consistency"),
        }
    }
}

impl From<FinalityError> for IndexerError {
    fn from(err: FinalityError) -> Self {
        match err {
            FinalityError::Provider | FinalityError::FinalityNotAvailable => IndexerError::Provider,
            FinalityError::Store => IndexerError::Fatal,
            FinalityError::UnresolvableFork | FinalityError::NonSequentialBlock => {
                IndexerError::Consistency
            }
        }
    }
}

pub trait ReportExt {
    fn to_exit_code(&self) -> ExitCode;
}

impl<T> ReportExt for Result<T> {
    fn to_exit_code(&self) -> ExitCode {
        match self {
            Ok(_) => ExitCode::SUCCESS,
            Err(err) => {
                eprintln!("{:?}", err);
                // Exit codes based on sysexits.h
                match err.current_context() {
                    IndexerError::Configuration => ExitCode::from(78),
                    IndexerError::Provider => ExitCode::from(69),
                    IndexerError::Consistency => ExitCode::from(65),
                    IndexerError::Fatal => ExitCode::FAILURE,
                }
            }
        }
    }
}
