use indicatif::{ProgressBar, ProgressStyle};

pub fn progress_bar(len: u64) -> ProgressBar {
    ProgressBar::new(len).with_style(
        ProgressStyle::with_template(
            "[{elapsed_precise}] {bar:30} {human_pos}/{human_len} records {msg}",
        )
        .expect("hardcoded"),
    )
}
