use crate::ui::icons::{CHECK, CROSS, PAUSED, REVIEW, RUNNING, SPARKLE};
use console::style;
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

/// Terminal UI for the foreman run, rendered via `indicatif` progress bars.
///
/// Two bars are stacked vertically:
/// - Item bar — tracks how many queued work items have completed
/// - Attempt bar — spinner with the current attempt number and live status
///
/// All methods coordinate output via `indicatif`'s `MultiProgress` internally,
/// so tier notes interleave cleanly with the bars.
pub struct QueueUi {
    multi: MultiProgress,
    item_bar: ProgressBar,
    attempt_bar: ProgressBar,
    verbose: bool,
    current_attempt: AtomicU32,
    max_attempts: AtomicU32,
}

impl QueueUi {
    /// Create the UI and add both progress bars to the multiplex renderer.
    ///
    /// `total_items` sizes the item bar; pass the scheduled queue length.
    /// When `verbose` is true the rendered gateway command and per-line
    /// output are echoed in addition to the tier notes.
    pub fn new(total_items: u64, verbose: bool) -> Self {
        let multi = MultiProgress::new();

        let item_style = ProgressStyle::default_bar()
            .template("{prefix:.bold.dim} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .expect("progress bar template is a valid static string")
            .progress_chars("█▓▒░");

        let item_bar = multi.add(ProgressBar::new(total_items));
        item_bar.set_style(item_style);
        item_bar.set_prefix("Items");

        let attempt_style = ProgressStyle::default_spinner()
            .template("{prefix:.bold.dim} {spinner} {msg}")
            .expect("progress bar template is a valid static string");

        let attempt_bar = multi.add(ProgressBar::new_spinner());
        attempt_bar.set_style(attempt_style);
        attempt_bar.set_prefix("  Try");

        Self {
            multi,
            item_bar,
            attempt_bar,
            verbose,
            current_attempt: AtomicU32::new(0),
            max_attempts: AtomicU32::new(0),
        }
    }

    /// UI that renders nothing. Used when the flow runs under a caller that
    /// owns the terminal, and by tests.
    pub fn hidden() -> Self {
        let ui = Self::new(0, false);
        ui.multi.set_draw_target(ProgressDrawTarget::hidden());
        ui
    }

    pub fn verbose(&self) -> bool {
        self.verbose
    }

    /// Print a line via `MultiProgress`, falling back to `eprintln!` if the
    /// rich UI fails. Critical messages must not be lost when stdout is
    /// unavailable.
    pub fn print_line(&self, msg: impl AsRef<str>) {
        if self.multi.println(msg.as_ref()).is_err() {
            eprintln!("{}", msg.as_ref());
        }
    }

    /// Update the item bar message to the item about to execute.
    ///
    /// Does not advance the counter; call [`Self::item_complete`] for that.
    pub fn start_item(&self, id: &str, title: &str) {
        self.item_bar
            .set_message(format!("{}: {}", style(id).yellow(), title));
    }

    /// Record attempt counters and start the spinner animation.
    pub fn start_attempt(&self, attempt: u32, max: u32) {
        self.current_attempt.store(attempt, Ordering::SeqCst);
        self.max_attempts.store(max, Ordering::SeqCst);
        self.attempt_bar.set_message(format!(
            "Attempt {}/{} {}",
            style(attempt).cyan(),
            max,
            style("(executing)").dim()
        ));
        self.attempt_bar
            .enable_steady_tick(Duration::from_millis(100));
    }

    /// Update the attempt spinner with the tier currently holding the item.
    pub fn attempt_status(&self, msg: &str) {
        let attempt = self.current_attempt.load(Ordering::SeqCst);
        let max = self.max_attempts.load(Ordering::SeqCst);
        self.attempt_bar.set_message(format!(
            "Attempt {}/{} {}",
            style(attempt).cyan(),
            max,
            style(format!("({msg})")).dim()
        ));
    }

    /// Tier-tagged note, e.g. `[manager] validation failed (attempt 2)`.
    pub fn note(&self, tag: &str, msg: impl AsRef<str>) {
        self.print_line(format!(
            "    {} {}",
            style(format!("[{tag}]")).dim(),
            msg.as_ref()
        ));
    }

    /// Tier-tagged warning in yellow.
    pub fn warn(&self, tag: &str, msg: impl AsRef<str>) {
        self.print_line(format!(
            "    {} {}",
            style(format!("[{tag}]")).yellow(),
            style(msg.as_ref()).yellow()
        ));
    }

    /// Review milestone line (QA pass, manager verdicts).
    pub fn review(&self, msg: impl AsRef<str>) {
        self.print_line(format!("    {} {}", REVIEW, msg.as_ref()));
    }

    /// Stop the attempt spinner with an acceptance message.
    pub fn attempt_accepted(&self, attempt: u32) {
        self.attempt_bar
            .finish_with_message(format!("{} Attempt {} accepted", CHECK, attempt));
    }

    /// Stop the attempt spinner with an error message.
    pub fn attempt_failed(&self, attempt: u32, msg: &str) {
        self.attempt_bar
            .finish_with_message(format!("{} Attempt {} failed: {}", CROSS, attempt, msg));
    }

    /// Advance the item bar and print a completion line.
    pub fn item_complete(&self, id: &str) {
        self.item_bar.inc(1);
        self.print_line(format!(
            "{} {} accepted",
            SPARKLE,
            style(id).green().bold()
        ));
    }

    /// Print an item-failure banner without advancing the item bar.
    pub fn item_failed(&self, id: &str, reason: &str) {
        self.print_line(format!(
            "{} {} failed: {}",
            CROSS,
            style(id).red().bold(),
            reason
        ));
    }

    /// Print a skip line for items outside this run's scope.
    pub fn item_skipped(&self, id: &str, reason: &str) {
        self.item_bar.inc(1);
        self.print_line(format!(
            "{} {} skipped: {}",
            PAUSED,
            style(id).dim(),
            reason
        ));
    }

    /// Print the header block for a pipeline section before it begins.
    pub fn print_section_header(&self, title: &str, detail: &str) {
        self.print_line("");
        self.print_line(format!("{}", style("═".repeat(70)).cyan()));
        self.print_line(format!(
            "{} {}",
            style("▶").green().bold(),
            style(title).yellow().bold()
        ));
        self.print_line(format!("{}", style("═".repeat(70)).cyan()));
        if !detail.is_empty() {
            self.print_line(format!("{}  {}", style("Queue:").dim(), detail));
        }
        self.print_line("");
    }

    /// Plain run milestone line, e.g. `▶ stage Planner`.
    pub fn milestone(&self, msg: impl AsRef<str>) {
        self.print_line(format!("{} {}", RUNNING, msg.as_ref()));
    }

    /// Clear the bars at the end of a run.
    pub fn finish(&self) {
        self.attempt_bar.finish_and_clear();
        self.item_bar.finish_and_clear();
    }
}
