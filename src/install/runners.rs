//! Terminal front end for the event stream
//!
//! Step events are printed as plain lines, terminal events in colour and
//! download samples drive an `indicatif` bar.

use std::io::Write;

use indicatif::{ProgressBar, ProgressStyle};
use termcolor::{Color, ColorChoice, ColorSpec, StandardStream, WriteColor};
use tokio::sync::mpsc;

use super::core::InstallEvent;
use super::download::ReleaseDescriptor;

/// Renders [`InstallEvent`]s to stdout
pub struct EventPrinter {
    stdout: StandardStream,
    bar: Option<ProgressBar>,
}

impl EventPrinter {
    pub fn new(color: ColorChoice) -> Self {
        Self {
            stdout: StandardStream::stdout(color),
            bar: None,
        }
    }

    pub fn print(&mut self, event: &InstallEvent) {
        match event {
            InstallEvent::DownloadProgress {
                percent,
                downloaded,
                total,
            } => {
                let bar = self.bar.get_or_insert_with(|| download_bar(*total));
                bar.set_position(*downloaded);
                if let Some(pct) = percent {
                    bar.set_message(format!("{pct}%"));
                }
            }
            InstallEvent::Progress(message) => {
                self.finish_bar();
                let _ = writeln!(self.stdout, "{message}");
            }
            InstallEvent::Success(message) => {
                self.finish_bar();
                self.colored_line(Color::Green, message);
            }
            InstallEvent::Error(message) => {
                self.finish_bar();
                self.colored_line(Color::Red, message);
            }
        }
    }

    fn colored_line(&mut self, color: Color, message: &str) {
        let _ = self
            .stdout
            .set_color(ColorSpec::new().set_fg(Some(color)).set_bold(true));
        let _ = writeln!(self.stdout, "{message}");
        let _ = self.stdout.reset();
    }

    fn finish_bar(&mut self) {
        if let Some(bar) = self.bar.take() {
            bar.finish();
        }
    }
}

fn download_bar(total: Option<u64>) -> ProgressBar {
    match total {
        Some(total) => {
            let bar = ProgressBar::new(total);
            bar.set_style(
                ProgressStyle::default_bar()
                    .template("   [{bar:50.green/blue}] {bytes}/{total_bytes}  {msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_bar())
                    .progress_chars("█▓░"),
            );
            bar
        }
        None => {
            let bar = ProgressBar::new_spinner();
            bar.set_style(
                ProgressStyle::default_spinner()
                    .template("   {spinner} {bytes} downloaded")
                    .unwrap_or_else(|_| ProgressStyle::default_spinner()),
            );
            bar
        }
    }
}

/// Print events until the run's terminal event arrives; returns it.
///
/// `None` when the stream closed without one.
pub async fn print_until_terminal(
    rx: &mut mpsc::Receiver<InstallEvent>,
    printer: &mut EventPrinter,
) -> Option<InstallEvent> {
    while let Some(event) = rx.recv().await {
        printer.print(&event);
        if event.is_terminal() {
            return Some(event);
        }
    }
    None
}

/// One line per release: tag (with prerelease flag), name if distinct, date
pub fn print_releases(releases: &[ReleaseDescriptor]) {
    let mut stdout = StandardStream::stdout(ColorChoice::Auto);
    if releases.is_empty() {
        let _ = writeln!(stdout, "No releases with Android server builds found");
        return;
    }

    for release in releases {
        let _ = stdout.set_color(ColorSpec::new().set_fg(Some(Color::Cyan)).set_bold(true));
        let _ = write!(stdout, "{}", release.display_name());
        let _ = stdout.reset();

        if release.name != release.tag_name {
            let _ = write!(stdout, "  {}", release.name);
        }
        match release.published_at {
            Some(published) => {
                let _ = writeln!(stdout, "  ({})", published.format("%Y-%m-%d"));
            }
            None => {
                let _ = writeln!(stdout);
            }
        }
    }
}

/// Installed state, metadata line and derived server type
pub fn print_info(installed: bool, info: Option<&str>, server_type: &str) {
    let mut stdout = StandardStream::stdout(ColorChoice::Auto);
    let (color, state) = if installed {
        (Color::Green, "installed")
    } else {
        (Color::Yellow, "not installed")
    };

    let _ = write!(stdout, "Server:  ");
    let _ = stdout.set_color(ColorSpec::new().set_fg(Some(color)).set_bold(true));
    let _ = writeln!(stdout, "{state}");
    let _ = stdout.reset();
    let _ = writeln!(stdout, "Version: {}", info.unwrap_or("-"));
    let _ = writeln!(stdout, "Type:    {server_type}");
}
