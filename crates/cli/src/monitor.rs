use std::io::BufRead;

use screencast::discovery::MonitorInfo;
use screencast::{Result, ScreencastError};

/// Read a monitor index from `input` and check it against `count`.
///
/// Anything that is not an integer in `0..count` is rejected with
/// [`ScreencastError::InvalidMonitor`]; an unreadable or unparsable line
/// reports index -1.
pub fn select_monitor(count: usize, input: &mut impl BufRead) -> Result<i32> {
    let mut line = String::new();
    if let Err(e) = input.read_line(&mut line) {
        tracing::warn!(error = %e, "cannot read monitor selection");
    }

    let index = line.trim().parse::<i64>().unwrap_or(-1);
    match usize::try_from(index) {
        Ok(i) if i < count => Ok(index as i32),
        _ => Err(ScreencastError::InvalidMonitor { index, count }),
    }
}

pub fn print_monitors(monitors: &[MonitorInfo]) {
    println!("Total of {} screens detected.", monitors.len());
    for m in monitors {
        println!(
            "  [{}] {}x{} at ({}, {})",
            m.index,
            m.width(),
            m.height(),
            m.left,
            m.top
        );
    }
}
