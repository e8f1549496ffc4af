//! Terminal front-end for `update-client`: runs one update check against an
//! appcast and reports the outcome.

mod cli;
mod prompt;

use anyhow::{anyhow, Result};
use clap::Parser;
use log::LevelFilter;
use std::io::Write;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use update_client::{
    AppInfo, Event, Progress, SessionEvent, SessionRegistry, SessionState, TerminateReason,
};

use cli::Opt;
use prompt::TerminalPrompter;

fn init_logger(level: LevelFilter) {
    let mut builder = env_logger::Builder::from_default_env();
    builder.filter_level(level);
    builder.filter_module("update_client", level);
    let _ = builder.try_init();
}

fn configure(registry: &SessionRegistry, opt: &Opt) {
    let url = opt.url.as_str();
    registry.set_notify_on_finish(url, true);
    registry.set_downloader_enabled(url, !opt.no_download);
    registry.set_use_custom_appcast(url, opt.custom_appcast);
    registry.set_mandatory_update(url, opt.mandatory);
    registry.set_timeout(
        url,
        (opt.timeout_seconds > 0).then(|| Duration::from_secs(opt.timeout_seconds)),
    );
    if let Some(platform) = &opt.platform {
        registry.set_platform_key(url, platform);
    }
    if let Some(dir) = &opt.download_dir {
        registry.set_download_dir(url, dir);
    }
    if let Some(user_agent) = &opt.user_agent {
        registry.set_user_agent(url, user_agent);
    }
}

fn progress_line(progress: &Progress) -> String {
    let mut line = match progress.percent() {
        Some(percent) => format!("{percent:>3}%  {}", progress.size_label()),
        None => progress.size_label(),
    };
    if let Some(remaining) = progress.time_remaining_label() {
        line += format!(", {remaining} left").as_str();
    }
    line
}

#[derive(Debug, Default)]
struct Outcome {
    failed: bool,
    terminate: Option<TerminateReason>,
}

fn report(event: Event, outcome: &mut Outcome) {
    match event {
        Event::CheckFinished {
            error: Some(error), ..
        } => {
            eprintln!("Update check failed: {error}");
            outcome.failed = true;
        }
        Event::AppcastDownloaded(body) => {
            println!("{}", String::from_utf8_lossy(&body));
        }
        Event::UpToDate { error: None } => println!("You are up to date."),
        Event::DownloadStarted { url, path } => {
            println!("Downloading {url}\n  to {}", path.display());
        }
        Event::DownloadProgress(progress) => {
            print!("\r{:<60}", progress_line(&progress));
            let _ = std::io::stdout().flush();
        }
        Event::DownloadFinished { path } => println!("\nSaved {}", path.display()),
        Event::DownloadFailed(error) => {
            eprintln!("\nDownload failed: {error}");
            outcome.failed = true;
        }
        Event::DownloadCancelled => println!("\nDownload cancelled."),
        Event::TerminateRequested(reason) => {
            log::info!("Exit requested: {reason:?}");
            outcome.terminate = Some(reason);
        }
        _ => {}
    }
}

fn run(opt: Opt) -> Result<ExitCode> {
    let app = AppInfo::new(opt.module_name.as_str(), opt.module_version.as_str());
    let registry = SessionRegistry::new(app)
        .with_prompter(Arc::new(TerminalPrompter::new(opt.yes, !opt.no_install)));
    configure(&registry, &opt);

    let events = registry.subscribe();
    let worker = registry.check_for_updates(&opt.url)?;

    let mut outcome = Outcome::default();
    for SessionEvent { event, .. } in events.iter() {
        if matches!(event, Event::StateChanged(SessionState::Idle)) {
            break;
        }
        report(event, &mut outcome);
    }
    worker
        .join()
        .map_err(|_| anyhow!("Update worker panicked"))?;

    Ok(match outcome.terminate {
        Some(TerminateReason::InstallerLaunched) | None if !outcome.failed => ExitCode::SUCCESS,
        Some(reason) => {
            eprintln!("The application must exit ({reason:?}).");
            ExitCode::from(2)
        }
        None => ExitCode::FAILURE,
    })
}

fn main() -> ExitCode {
    let opt = Opt::parse();
    init_logger(opt.log_level.into());

    match run(opt) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_line() {
        let progress = Progress {
            received: 512,
            total: Some(1024),
            elapsed: Duration::from_secs(2),
        };
        assert_eq!(progress_line(&progress), " 50%  512 bytes of 1 KB, 2 seconds left");

        let unknown = Progress {
            received: 2048,
            total: None,
            elapsed: Duration::from_secs(1),
        };
        assert_eq!(progress_line(&unknown), "2 KB");
    }

    #[test]
    fn test_report_tracks_failures_and_exit_requests() {
        let mut outcome = Outcome::default();
        report(Event::DownloadCancelled, &mut outcome);
        assert!(!outcome.failed);

        report(
            Event::TerminateRequested(TerminateReason::UpdateDeclined),
            &mut outcome,
        );
        assert_eq!(outcome.terminate, Some(TerminateReason::UpdateDeclined));
    }
}
