use chrono::Local;
use env_logger::Builder;
use itertools::Itertools;
use log::{debug, LevelFilter};
use std::io::Write;

/// Convert an io::error to a string and strip "(os error N)" from the end.
pub fn io_error_to_string(err: &std::io::Error) -> String {
    let s = err.to_string();
    s.strip_suffix(&format!(" (os error {})", err.raw_os_error().unwrap_or(0)))
        .unwrap_or(&s)
        .to_string()
}

/// Print an error chain.
pub fn print_error_chain(err: &anyhow::Error) {
    let error_chain = err
        .chain()
        .map(|e| match e.downcast_ref::<std::io::Error>() {
            Some(io_err) => io_error_to_string(io_err),
            None => e.to_string(),
        })
        .join("\n\tCaused by: ");
    println!("ERROR: {error_chain}");
}

/// Install the process logger. `RUST_LOG` overrides the default level.
pub fn init_logging(verbose: bool) {
    let level = if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    let installed = Builder::new()
        .format(|buf, record| {
            writeln!(
                buf,
                "{} [{}] - {}",
                Local::now().format("%Y-%m-%dT%H:%M:%S"),
                record.level(),
                record.args()
            )
        })
        .filter_level(level)
        .parse_default_env()
        .try_init();
    if let Err(e) = installed {
        debug!("logger already installed: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_io_error_to_string() {
        let err = io::Error::from_raw_os_error(2);
        assert_eq!(io_error_to_string(&err), "No such file or directory");
        let err = io::Error::new(io::ErrorKind::Other, "plain");
        assert_eq!(io_error_to_string(&err), "plain");
    }
}
