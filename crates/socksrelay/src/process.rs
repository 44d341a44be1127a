//! Code to adjust process-related parameters.

use tracing::{debug, warn};

use crate::cfg::SystemConfig;

/// Set our current maximum-file limit to a large value, if we can.
///
/// Every session holds two sockets, so a busy proxy needs a _lot_ of file
/// descriptors.
///
/// # Limitations
///
/// This doesn't actually do anything on windows.
pub(crate) fn use_max_file_limit(config: &SystemConfig) {
    match rlimit::increase_nofile_limit(config.max_files) {
        Ok(n) => debug!("Increased process file limit to {}", n),
        Err(e) => warn!("{}", describe_limit_error(e)),
    }
}

/// Describe a failure to raise the file limit, with its whole cause chain.
fn describe_limit_error(e: std::io::Error) -> String {
    let e = anyhow::Error::new(e).context("Error while increasing file limit");
    format!("{:#}", e)
}

#[cfg(test)]
mod test {
    // @@ begin test lint list @@
    #![allow(clippy::bool_assert_comparison)]
    #![allow(clippy::clone_on_copy)]
    #![allow(clippy::dbg_macro)]
    #![allow(clippy::mixed_attributes_style)]
    #![allow(clippy::print_stderr)]
    #![allow(clippy::print_stdout)]
    #![allow(clippy::single_char_pattern)]
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::useless_vec)]
    #![allow(clippy::needless_pass_by_value)]
    //! <!-- @@ end test lint list @@ -->
    use super::*;
    use std::io;

    /// An error that wraps another, so that it has a source.
    #[derive(Debug, thiserror::Error)]
    #[error("setrlimit refused")]
    struct Refused(#[source] io::Error);

    #[test]
    fn limit_error_shows_causes() {
        let inner = io::Error::from(io::ErrorKind::PermissionDenied);
        let e = io::Error::new(io::ErrorKind::Other, Refused(inner));
        assert_eq!(
            describe_limit_error(e),
            "Error while increasing file limit: setrlimit refused: permission denied"
        );
    }
}
