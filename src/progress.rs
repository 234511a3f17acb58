use indicatif::{ProgressBar, ProgressStyle};

/// Create a progress bar for applying incoming records
pub fn create_record_progress_bar(total: u64, message: &str) -> ProgressBar {
    let pb = ProgressBar::new(total);
    let style = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=>-");
    pb.set_style(style);
    pb.set_message(message.to_string());
    pb
}

/// Hidden bar for quiet runs and tests
pub fn create_hidden_progress_bar(total: u64) -> ProgressBar {
    let pb = ProgressBar::hidden();
    pb.set_length(total);
    pb
}

/// Finish progress bar with success message
pub fn finish_with_success(pb: &ProgressBar, message: &str) {
    pb.finish_with_message(format!("✅ {}", message));
}

/// Finish progress bar with error message
pub fn finish_with_error(pb: &ProgressBar, message: &str) {
    pb.finish_with_message(format!("❌ {}", message));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hidden_bar_tracks_length_only() {
        let pb = create_hidden_progress_bar(12);
        assert!(pb.is_hidden());
        assert_eq!(pb.length(), Some(12));
        assert!(pb.message().is_empty());

        pb.inc(3);
        finish_with_success(&pb, "done");
        assert_eq!(pb.position(), 3);
        assert!(pb.is_finished());
    }
}
