//! Record formatting: `LEVEL\ttimestamp\tpid:tid\tfile:line\tmessage\n`.

use crate::level::LogLevel;

fn current_tid() -> i64 {
    // SAFETY: SYS_gettid is a simple, argument-free syscall; always succeeds on Linux.
    unsafe { libc::syscall(libc::SYS_gettid) }
}

#[must_use]
pub fn format_record(level: LogLevel, file: &str, line: u32, message: &str) -> String {
    let timestamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f");
    let pid = std::process::id();
    let tid = current_tid();
    format!("{level}\t{timestamp}\t{pid}:{tid}\t{file}:{line}\t{message}\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_record_has_five_tab_separated_fields() {
        let line = format_record(LogLevel::Info, "main.rs", 42, "hello");
        let fields: Vec<&str> = line.trim_end_matches('\n').splitn(5, '\t').collect();
        assert_eq!(fields.len(), 5);
        assert_eq!(fields[0], "INFO");
        assert_eq!(fields[3], "main.rs:42");
        assert_eq!(fields[4], "hello");
        assert!(line.ends_with('\n'));
    }
}
