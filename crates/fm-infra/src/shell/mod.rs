//! Remote shell implementations.

mod docker;
mod ssh;

pub use docker::DockerShell;
pub use ssh::{SshConfig, SshShell};

/// Quote `raw` as a single POSIX shell word. Embedded single quotes become
/// `'"'"'`.
pub fn shell_quote(raw: &str) -> String {
    format!("'{}'", raw.replace('\'', r#"'"'"'"#))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quotes_single_quotes() {
        assert_eq!(shell_quote("plain"), "'plain'");
        assert_eq!(shell_quote("it's"), r#"'it'"'"'s'"#);
    }
}
