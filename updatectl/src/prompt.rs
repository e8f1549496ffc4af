use std::io::{self, BufRead, Write};
use std::path::Path;
use update_client::{Decision, Prompter, UpdateNotice};

/// Asks on the terminal, or answers yes to everything with `assume_yes`.
pub struct TerminalPrompter {
    assume_yes: bool,
    install: bool,
}

impl TerminalPrompter {
    pub fn new(assume_yes: bool, install: bool) -> Self {
        Self {
            assume_yes,
            install,
        }
    }

    fn ask(&self, question: &str) -> Decision {
        if self.assume_yes {
            println!("{question} [y/N] y");
            return Decision::Accept;
        }

        print!("{question} [y/N] ");
        let _ = io::stdout().flush();

        let mut answer = String::new();
        match io::stdin().lock().read_line(&mut answer) {
            Ok(_) => parse_answer(&answer),
            Err(e) => {
                log::warn!("Failed to read answer: {e}");
                Decision::Decline
            }
        }
    }
}

impl Prompter for TerminalPrompter {
    fn update_available(&self, _url: &str, notice: &UpdateNotice) -> Decision {
        self.ask(&build_update_message(notice))
    }

    fn confirm_cancel(&self, _url: &str, mandatory: bool) -> Decision {
        if mandatory {
            self.ask("This update is required. Cancelling will close the application. Cancel anyway?")
        } else {
            self.ask("Cancel the download?")
        }
    }

    fn confirm_install(&self, _url: &str, path: &Path, mandatory: bool) -> Decision {
        if !self.install {
            return Decision::Decline;
        }

        let mut question = format!("Open {} now?", path.display());
        if mandatory {
            question.insert_str(0, "The application has to close to install this update. ");
        }
        self.ask(&question)
    }
}

pub fn parse_answer(answer: &str) -> Decision {
    match answer.trim().to_ascii_lowercase().as_str() {
        "y" | "yes" => Decision::Accept,
        _ => Decision::Decline,
    }
}

pub fn build_update_message(notice: &UpdateNotice) -> String {
    let changelog = if notice.changelog.is_empty() {
        String::new()
    } else {
        format!("\n{}\n\n", notice.changelog.trim_end())
    };

    format!(
        "{} {} is available.\n{}{}Do you want to update?",
        notice.module_name,
        notice.latest_version,
        changelog,
        if notice.mandatory {
            "This update is required.\n"
        } else {
            ""
        }
    )
}
