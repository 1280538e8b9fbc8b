use thiserror::Error;

use crate::mutators::ChangeKind;

macro_rules! malformed_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::Malformed {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Malformed {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// The variants follow the failure taxonomy of the instrumentation engine and the change
/// tracker. Some of them are configuration or programming errors and are expected to stop
/// the host from enabling tracking, others are surfaced per binary or per pass.
///
/// # Error Categories
///
/// ## Configuration Errors (fatal at startup)
/// - [`Error::UnknownMutator`] - A mutator without a change-kind mapping was encountered
/// - [`Error::UnsupportedBackend`] - The rewriter cannot run on the configured execution backend
/// - [`Error::AlreadyInitialized`] - A session was initialized twice
///
/// ## Runtime Errors
/// - [`Error::MissingHandler`] - A committed value had no matching callback variant
/// - [`Error::NoInterceptionInFlight`] - An "after" hook arrived without a matching "before"
/// - [`Error::MalformedPayload`] - The hook payload did not have the expected shape
///
/// ## Instrumentation Pass Errors
/// - [`Error::ModuleLoad`] - The host loader failed to load a binary
/// - [`Error::Patch`] - The host patcher refused a rewritten body
/// - [`Error::Malformed`] - An instruction stream could not be transformed
///
/// ## I/O and External Errors
/// - [`Error::FileError`] - Filesystem I/O errors
/// - [`Error::Serialization`] - Cache or configuration (de)serialization failures
///
/// # Examples
///
/// ```rust
/// use mutscope::{Error, ExecutionBackend, Rewriter, MutatorTable};
///
/// let table = MutatorTable::transform();
/// match Rewriter::new(ExecutionBackend::AheadOfTime, &table) {
///     Err(Error::UnsupportedBackend(backend)) => println!("cannot rewrite on {backend}"),
///     Err(e) => println!("Other error: {e}"),
///     Ok(_) => println!("ready"),
/// }
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// The given method is not part of the supported mutator set.
    ///
    /// The mapping from mutator to change kind is total over the configured table, so
    /// seeing an unknown name means the table and the instrumented code disagree.
    #[error("No change kind is registered for mutator '{0}'")]
    UnknownMutator(String),

    /// Instruction rewriting is not available on this execution backend.
    #[error("Instruction rewriting is not supported on the '{0}' backend")]
    UnsupportedBackend(crate::ExecutionBackend),

    /// A committed value had no callback variant able to receive it.
    ///
    /// This signals an incomplete handler implementation and is not meant to be recovered from.
    #[error("No callback handler implemented for {value_type} values of {kind} changes")]
    MissingHandler {
        /// Change kind the callback was registered for
        kind: ChangeKind,
        /// Name of the value type that could not be delivered
        value_type: &'static str,
    },

    /// An "after" hook was received while no interception was in flight.
    #[error("Received an 'after' hook without a preceding 'before' hook")]
    NoInterceptionInFlight,

    /// The payload handed to a hook does not have the expected layout.
    #[error("Malformed hook payload - {0}")]
    MalformedPayload(String),

    /// The session was already initialized.
    #[error("Tracking session is already initialized")]
    AlreadyInitialized,

    /// The host failed to load a binary module.
    #[error("Unable to load module '{path}': {message}")]
    ModuleLoad {
        /// Path of the binary that failed to load
        path: String,
        /// Loader supplied reason
        message: String,
    },

    /// The host failed to install a rewritten method body.
    #[error("Unable to patch method '{method}': {message}")]
    Patch {
        /// Full name of the method that could not be patched
        method: String,
        /// Patcher supplied reason
        message: String,
    },

    /// An instruction stream could not be processed.
    ///
    /// # Fields
    ///
    /// * `message` - Detailed description of what was malformed
    /// * `file` - Source file where the error was detected
    /// * `line` - Source line where the error was detected
    #[error("Malformed - {file}:{line}: {message}")]
    Malformed {
        /// The message to be printed for the Malformed error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// File I/O error.
    #[error("{0}")]
    FileError(#[from] std::io::Error),

    /// Serialization error from the cache or configuration layer.
    #[error("{0}")]
    Serialization(#[from] serde_json::Error),
}
