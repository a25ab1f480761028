use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvalMode {
    Mocked,
    Live,
}

impl EvalMode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Mocked => "mocked",
            Self::Live => "live",
        }
    }
}

#[derive(Debug, Clone)]
pub struct CliOptions {
    pub mode: EvalMode,
    /// Fixture ids to run, in first-seen order. Empty runs every case.
    pub case_ids: Vec<String>,
}

#[derive(Debug, Error)]
pub enum CliError {
    #[error("unknown argument: {0}")]
    UnknownArgument(String),
    #[error("missing value for argument: {0}")]
    MissingValue(String),
    #[error("invalid --mode value: {0}")]
    InvalidMode(String),
    #[error("--case needs a non-empty fixture id, got '{0}'")]
    EmptyCaseId(String),
    #[error("help requested")]
    HelpRequested,
}

impl CliOptions {
    /// Accepts `--flag value` and `--flag=value`. `--case` may repeat and
    /// takes comma-separated ids.
    pub fn parse<I>(args: I) -> Result<Self, CliError>
    where
        I: IntoIterator<Item = String>,
    {
        let mut options = Self {
            mode: EvalMode::Mocked,
            case_ids: Vec::new(),
        };

        let mut iter = args.into_iter();
        while let Some(arg) = iter.next() {
            let (flag, inline_value) = match arg.split_once('=') {
                Some((flag, value)) => (flag, Some(value.to_string())),
                None => (arg.as_str(), None),
            };
            match flag {
                "--help" | "-h" if inline_value.is_none() => return Err(CliError::HelpRequested),
                "--mode" | "--case" => {
                    let value = match inline_value {
                        Some(value) => value,
                        None => iter
                            .next()
                            .ok_or_else(|| CliError::MissingValue(flag.to_string()))?,
                    };
                    if flag == "--mode" {
                        options.mode = parse_mode(&value)?;
                    } else {
                        options.push_case_ids(&value)?;
                    }
                }
                _ => return Err(CliError::UnknownArgument(arg.clone())),
            }
        }

        Ok(options)
    }

    fn push_case_ids(&mut self, value: &str) -> Result<(), CliError> {
        for id in value.split(',').map(str::trim) {
            if id.is_empty() {
                return Err(CliError::EmptyCaseId(value.to_string()));
            }
            if !self.case_ids.iter().any(|seen| seen == id) {
                self.case_ids.push(id.to_string());
            }
        }
        Ok(())
    }
}

fn parse_mode(value: &str) -> Result<EvalMode, CliError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "mocked" => Ok(EvalMode::Mocked),
        "live" => Ok(EvalMode::Live),
        _ => Err(CliError::InvalidMode(value.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::{CliError, CliOptions, EvalMode};

    fn parse(args: &[&str]) -> Result<CliOptions, CliError> {
        CliOptions::parse(args.iter().map(|arg| arg.to_string()))
    }

    #[test]
    fn defaults_to_mocked_mode_over_all_cases() {
        let options = parse(&[]).expect("empty args should parse");
        assert_eq!(options.mode, EvalMode::Mocked);
        assert!(options.case_ids.is_empty());
    }

    #[test]
    fn parses_mode_and_case() {
        let options = parse(&["--mode", "LIVE", "--case", "chat_client_redacted"])
            .expect("args should parse");
        assert_eq!(options.mode, EvalMode::Live);
        assert_eq!(options.case_ids, vec!["chat_client_redacted"]);
    }

    #[test]
    fn collects_case_ids_across_flags_and_lists() {
        let options = parse(&[
            "--case=chat_kill_switch, egress_push_notification",
            "--case",
            "chat_kill_switch",
            "--mode=mocked",
        ])
        .expect("args should parse");
        assert_eq!(
            options.case_ids,
            vec!["chat_kill_switch", "egress_push_notification"]
        );
    }

    #[test]
    fn rejects_blank_case_ids() {
        assert!(matches!(parse(&["--case", "  "]), Err(CliError::EmptyCaseId(_))));
        assert!(matches!(parse(&["--case="]), Err(CliError::EmptyCaseId(_))));
        assert!(matches!(
            parse(&["--case", "chat_kill_switch,,egress_push_notification"]),
            Err(CliError::EmptyCaseId(_))
        ));
    }

    #[test]
    fn rejects_bad_input() {
        assert!(matches!(parse(&["--mode", "replay"]), Err(CliError::InvalidMode(_))));
        assert!(matches!(parse(&["--case"]), Err(CliError::MissingValue(_))));
        assert!(matches!(parse(&["--verbose"]), Err(CliError::UnknownArgument(_))));
        assert!(matches!(parse(&["--help=yes"]), Err(CliError::UnknownArgument(_))));
        assert!(matches!(parse(&["-h"]), Err(CliError::HelpRequested)));
    }
}
