use testbench_core::EXIT_TRAILER_PREFIX;

/// The exit status recorded by the in-image harness.
///
/// The trailer must be the last non-blank line of the stream; a trailer
/// anywhere else is ordinary test output.
pub fn exit_status(stream: &str) -> Option<i32> {
    let last = stream.lines().rev().find(|line| !line.trim().is_empty())?;
    last.trim_end()
        .strip_prefix(EXIT_TRAILER_PREFIX)?
        .trim()
        .parse()
        .ok()
}

/// The trailer line for `status`, newline included
pub fn format_trailer(status: i32) -> String {
    format!("{EXIT_TRAILER_PREFIX}{status}\n")
}
