//! Interactive operator menu.
//!
//! Four actions, one per ingestion entry point plus exit. Input faults
//! (unknown option, declined confirmation, malformed date, empty store)
//! are printed and the menu is shown again; an interrupted run ends the
//! menu so the process can exit. Prompts race the input against Ctrl-C,
//! so an interrupt while waiting for a choice ends the menu too.

use std::io::Write;
use std::path::Path;

use anyhow::Result;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use commit_mirror_core::models::format_ts;

use crate::ingest::{run_mode, Ingestor, ModeError, ModeReport, RunOutcome};
use crate::progress::{format_hms, format_number};
use crate::stats::StoreStats;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MenuChoice {
    Initial,
    CatchUp,
    Extend,
    Exit,
    Invalid(String),
}

impl MenuChoice {
    pub fn parse(input: &str) -> Self {
        match input.trim() {
            "1" => MenuChoice::Initial,
            "2" => MenuChoice::CatchUp,
            "3" => MenuChoice::Extend,
            "4" => MenuChoice::Exit,
            other => MenuChoice::Invalid(other.to_string()),
        }
    }
}

/// How the menu loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuExit {
    /// Operator chose exit or closed input.
    Quit,
    /// Ctrl-C during a run or at a prompt. Time from an interrupted run
    /// has been saved.
    Interrupted,
}

/// What a prompt produced.
enum Input {
    Line(String),
    Closed,
    Interrupted,
}

const MENU: &str = "\n=== Commit Ingestion Menu ===\n\
1. Initial ingestion (first run, or continue an interrupted one)\n\
2. Catch up with new commits\n\
3. Extend ingestion with older commits\n\
4. Exit";

pub struct Menu<'a, R, W> {
    ingestor: &'a Ingestor,
    elapsed_file: &'a Path,
    input: R,
    output: W,
}

impl<'a, R: AsyncBufRead + Unpin, W: Write> Menu<'a, R, W> {
    pub fn new(ingestor: &'a Ingestor, elapsed_file: &'a Path, input: R, output: W) -> Self {
        Self {
            ingestor,
            elapsed_file,
            input,
            output,
        }
    }

    pub async fn run(&mut self) -> Result<MenuExit> {
        loop {
            writeln!(self.output, "{}", MENU)?;
            let line = match self.prompt("Select an option (1-4): ").await? {
                Input::Line(line) => line,
                Input::Closed => return Ok(MenuExit::Quit),
                Input::Interrupted => return Ok(MenuExit::Interrupted),
            };

            let exit = match MenuChoice::parse(&line) {
                MenuChoice::Initial => self.initial().await?,
                MenuChoice::CatchUp => self.catch_up().await?,
                MenuChoice::Extend => self.extend().await?,
                MenuChoice::Exit => {
                    writeln!(self.output, "Exiting. Goodbye!")?;
                    return Ok(MenuExit::Quit);
                }
                MenuChoice::Invalid(_) => {
                    writeln!(self.output, "Invalid option. Please select 1, 2, 3 or 4.")?;
                    None
                }
            };
            if let Some(exit) = exit {
                return Ok(exit);
            }
        }
    }

    async fn initial(&mut self) -> Result<Option<MenuExit>> {
        let outcome = run_mode(self.ingestor, self.elapsed_file, self.ingestor.initial()).await;
        self.finish(outcome)
    }

    async fn catch_up(&mut self) -> Result<Option<MenuExit>> {
        let stats = self.stats().await?;
        let newest = match stats.newest {
            Some(newest) => newest,
            None => {
                let err = ModeError::EmptyStore(stats.project_id);
                writeln!(self.output, "{}", err)?;
                return Ok(None);
            }
        };

        writeln!(self.output, "Commits currently stored: {}", stats.count)?;
        writeln!(self.output, "Looking for new commits since: {}", format_ts(&newest))?;
        writeln!(
            self.output,
            "WARNING: if the initial ingestion has not completed, catching up now \
             leaves a gap below {} that no later run will fill.",
            format_ts(&newest)
        )?;
        let confirmed = match self.prompt("Are you sure you want to continue? (yes/no): ").await? {
            Input::Line(answer) => is_yes(&answer),
            Input::Closed => false,
            Input::Interrupted => return Ok(Some(MenuExit::Interrupted)),
        };

        let outcome = run_mode(
            self.ingestor,
            self.elapsed_file,
            self.ingestor.catch_up(confirmed),
        )
        .await;
        self.finish(outcome)
    }

    async fn extend(&mut self) -> Result<Option<MenuExit>> {
        let stats = self.stats().await?;
        let oldest = match stats.oldest {
            Some(oldest) => oldest,
            None => {
                let err = ModeError::EmptyStore(stats.project_id);
                writeln!(self.output, "{}", err)?;
                return Ok(None);
            }
        };

        writeln!(self.output, "Commits currently stored: {}", stats.count)?;
        writeln!(self.output, "Oldest stored commit: {}", format_ts(&oldest))?;
        writeln!(
            self.output,
            "Enter the date to extend the ingestion back to \
             (format: YYYY-MM-DDTHH:MM:SSZ, e.g. 2017-01-01T00:00:00Z):"
        )?;
        let input = match self.prompt("New start date: ").await? {
            Input::Line(input) => input,
            Input::Closed => return Ok(Some(MenuExit::Quit)),
            Input::Interrupted => return Ok(Some(MenuExit::Interrupted)),
        };

        let outcome = run_mode(
            self.ingestor,
            self.elapsed_file,
            self.ingestor.extend_backward_from_input(&input),
        )
        .await;
        self.finish(outcome)
    }

    async fn stats(&self) -> Result<StoreStats> {
        StoreStats::collect(self.ingestor.store().as_ref(), self.ingestor.project_id()).await
    }

    /// Print the outcome; operator faults go back to the menu.
    fn finish(&mut self, outcome: Result<RunOutcome>) -> Result<Option<MenuExit>> {
        match outcome {
            Ok(RunOutcome::Completed {
                report,
                elapsed_secs,
            }) => {
                writeln!(self.output, "{}", report)?;
                writeln!(
                    self.output,
                    "Completed in {}",
                    format_hms(elapsed_secs as u64)
                )?;
                Ok(None)
            }
            Ok(RunOutcome::Interrupted {
                report,
                stored,
                estimate,
                elapsed_secs,
            }) => {
                print_interrupted(&mut self.output, report.as_ref(), stored, estimate, elapsed_secs)?;
                Ok(Some(MenuExit::Interrupted))
            }
            Err(e) => match e.downcast_ref::<ModeError>() {
                Some(mode_error) => {
                    writeln!(self.output, "{}", mode_error)?;
                    Ok(None)
                }
                None => Err(e),
            },
        }
    }

    async fn prompt(&mut self, text: &str) -> Result<Input> {
        write!(self.output, "{}", text)?;
        self.output.flush()?;
        let ingestor = self.ingestor;
        let mut line = String::new();
        let read = tokio::select! {
            biased;
            _ = ingestor.interrupt().wait() => None,
            read = self.input.read_line(&mut line) => Some(read?),
        };
        match read {
            None => {
                writeln!(self.output, "\nInterrupted. Goodbye!")?;
                Ok(Input::Interrupted)
            }
            Some(0) => Ok(Input::Closed),
            Some(_) => Ok(Input::Line(line.trim().to_string())),
        }
    }
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_lowercase().as_str(), "yes" | "y")
}

/// Summary printed when a run is stopped by Ctrl-C.
pub fn print_interrupted(
    out: &mut impl Write,
    report: Option<&ModeReport>,
    stored: u64,
    estimate: Option<u64>,
    elapsed_secs: f64,
) -> Result<()> {
    writeln!(out, "\n\nRun interrupted with Ctrl-C. Process stopped.")?;
    match estimate {
        Some(total) => writeln!(
            out,
            "Commits stored so far: {} of an estimated ~{}",
            format_number(stored),
            format_number(total)
        )?,
        None => writeln!(out, "Commits stored so far: {}", format_number(stored))?,
    }
    writeln!(
        out,
        "Accumulated run time so far: {}",
        format_hms(elapsed_secs as u64)
    )?;
    if let Some(report) = report {
        writeln!(out, "{}", report)?;
    }
    writeln!(out, "Goodbye!")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::IngestSettings;
    use commit_mirror_core::models::parse_ts;
    use commit_mirror_core::source::memory::InMemorySource;
    use commit_mirror_core::store::memory::InMemoryCommitStore;
    use std::io::Cursor;
    use std::sync::Arc;

    struct Fixture {
        _tmp: tempfile::TempDir,
        elapsed: std::path::PathBuf,
        source: Arc<InMemorySource>,
        store: Arc<InMemoryCommitStore>,
        ingestor: Ingestor,
    }

    fn fixture() -> Fixture {
        let tmp = tempfile::TempDir::new().unwrap();
        let elapsed = tmp.path().join("ingestion_time.json");
        let source = Arc::new(InMemorySource::new("p"));
        let base = parse_ts("2020-01-01T00:00:00Z").unwrap();
        for i in 0..5 {
            source.push_commit(&format!("a{}", i), base + chrono::Duration::days(i));
        }
        let store = Arc::new(InMemoryCommitStore::new());
        let ingestor = Ingestor::new(
            source.clone(),
            store.clone(),
            IngestSettings {
                start_date: base,
                per_page: 10,
                workers: 2,
            },
        );
        Fixture {
            _tmp: tmp,
            elapsed,
            source,
            store,
            ingestor,
        }
    }

    async fn drive(fx: &Fixture, script: &str) -> (MenuExit, String) {
        let mut out = Vec::new();
        let exit = Menu::new(&fx.ingestor, &fx.elapsed, Cursor::new(script.to_string()), &mut out)
            .run()
            .await
            .unwrap();
        (exit, String::from_utf8(out).unwrap())
    }

    #[test]
    fn choices_parse() {
        assert_eq!(MenuChoice::parse(" 1\n"), MenuChoice::Initial);
        assert_eq!(MenuChoice::parse("4"), MenuChoice::Exit);
        assert_eq!(MenuChoice::parse("9"), MenuChoice::Invalid("9".to_string()));
        assert!(is_yes("YES"));
        assert!(!is_yes("si"));
    }

    #[tokio::test]
    async fn initial_then_exit() {
        let fx = fixture();
        let (exit, out) = drive(&fx, "1\n4\n").await;
        assert_eq!(exit, MenuExit::Quit);
        assert_eq!(fx.store.len(), 5);
        assert!(out.contains("Completed in"));
        assert!(out.contains("Goodbye"));
    }

    #[tokio::test]
    async fn invalid_option_shows_menu_again() {
        let fx = fixture();
        let (exit, out) = drive(&fx, "7\n").await;
        assert_eq!(exit, MenuExit::Quit);
        assert!(out.contains("Invalid option"));
        assert_eq!(out.matches("=== Commit Ingestion Menu ===").count(), 2);
    }

    #[tokio::test]
    async fn catch_up_on_empty_store_returns_to_menu() {
        let fx = fixture();
        let (_, out) = drive(&fx, "2\n4\n").await;
        assert!(out.contains("run the initial ingestion first"));
        assert!(fx.source.listing_calls().is_empty());
    }

    #[tokio::test]
    async fn declined_catch_up_does_nothing() {
        let fx = fixture();
        drive(&fx, "1\n4\n").await;
        let listings = fx.source.listing_calls().len();

        let (_, out) = drive(&fx, "2\nno\n4\n").await;
        assert!(out.contains("operation cancelled"));
        assert_eq!(fx.source.listing_calls().len(), listings);
    }

    #[tokio::test]
    async fn malformed_extend_date_is_rejected() {
        let fx = fixture();
        drive(&fx, "1\n4\n").await;

        let (_, out) = drive(&fx, "3\n2019-01-01\n4\n").await;
        assert!(out.contains("expected YYYY-MM-DDTHH:MM:SSZ"));
        assert_eq!(fx.store.len(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn ctrl_c_at_the_prompt_ends_the_menu() {
        let fx = fixture();
        // The writer half stays open, so the read never completes.
        let (operator, _terminal) = tokio::io::duplex(64);
        let interrupt = fx.ingestor.interrupt().clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_secs(2)).await;
            interrupt.trigger();
        });

        let mut out = Vec::new();
        let exit = Menu::new(
            &fx.ingestor,
            &fx.elapsed,
            tokio::io::BufReader::new(operator),
            &mut out,
        )
        .run()
        .await
        .unwrap();
        let out = String::from_utf8(out).unwrap();

        assert_eq!(exit, MenuExit::Interrupted);
        assert!(out.contains("Interrupted. Goodbye!"));
        assert!(fx.source.listing_calls().is_empty());
        assert!(!fx.elapsed.exists());
    }

    #[test]
    fn interrupted_summary_reports_stored_count() {
        let mut out = Vec::new();
        print_interrupted(&mut out, None, 1234, Some(5000), 61.0).unwrap();
        let out = String::from_utf8(out).unwrap();
        assert!(out.contains("Commits stored so far: 1,234 of an estimated ~5,000"));
        assert!(out.contains("0 hours, 1 minutes and 1 seconds"));

        let mut out = Vec::new();
        print_interrupted(&mut out, None, 7, None, 0.0).unwrap();
        assert!(String::from_utf8(out).unwrap().contains("Commits stored so far: 7\n"));
    }
}
