use std::fmt;
use std::io::{self, BufRead, Write};
use std::sync::Arc;

use adviser_agent::{
    CourseCatalog, CoursePicker, DialogueRuntime, KeywordExtractor, PickerSettings,
    RuntimeSettings, TemplateCatalog, TurnOutput,
};
use adviser_core::config::{AppConfig, LoadOptions};
use adviser_core::{ConversationId, DialogueError};
use anyhow::Context;
use chrono::Utc;

use crate::commands::{CommandResult, EXIT_CATALOG, EXIT_RUNTIME};

const PROMPT: &str = "> ";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChatEnding {
    /// The user said goodbye or declined another round.
    Closed,
    /// Input ended before the conversation did.
    Abandoned,
    /// The runtime dropped the session, e.g. after the idle timeout.
    Expired,
}

impl fmt::Display for ChatEnding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Closed => "closed",
            Self::Abandoned => "abandoned",
            Self::Expired => "expired",
        };
        f.write_str(label)
    }
}

#[derive(Clone, Copy, Debug)]
pub struct ChatSummary {
    pub session_id: ConversationId,
    pub turns: u32,
    pub ending: ChatEnding,
}

pub fn run(options: LoadOptions) -> CommandResult {
    let stdin = io::stdin();
    let stdout = io::stdout();
    run_with_io(options, stdin.lock(), stdout.lock())
}

pub fn run_with_io<R: BufRead, W: Write>(
    options: LoadOptions,
    input: R,
    mut output: W,
) -> CommandResult {
    let config = match AppConfig::load(options) {
        Ok(config) => config,
        Err(error) => return CommandResult::config_failure("chat", &error),
    };
    crate::init_logging(&config);

    let catalog = match CourseCatalog::from_config(&config.catalog) {
        Ok(catalog) => catalog,
        Err(error) => {
            return CommandResult::failure(
                "chat",
                "course_catalog",
                error.to_string(),
                EXIT_CATALOG,
            )
        }
    };
    let templates = match TemplateCatalog::from_config(&config.catalog) {
        Ok(templates) => Arc::new(templates),
        Err(error) => {
            return CommandResult::failure(
                "chat",
                "template_catalog",
                error.to_string(),
                EXIT_CATALOG,
            )
        }
    };

    let picker = CoursePicker::new(catalog, PickerSettings::from_config(&config.catalog));
    let runtime =
        DialogueRuntime::new(Arc::new(KeywordExtractor::new()), Arc::new(picker), templates.clone())
            .with_settings(RuntimeSettings::from_config(&config));

    let executor = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(executor) => executor,
        Err(error) => {
            return CommandResult::failure(
                "chat",
                "runtime_init",
                format!("failed to initialize async runtime: {error}"),
                EXIT_RUNTIME,
            )
        }
    };

    match executor.block_on(run_conversation(&runtime, &templates, input, &mut output)) {
        Ok(summary) => CommandResult::success(
            "chat",
            format!(
                "conversation {} {} after {} turn(s)",
                summary.session_id, summary.ending, summary.turns
            ),
        ),
        Err(error) => CommandResult::failure("chat", "dialogue", format!("{error:#}"), EXIT_RUNTIME),
    }
}

/// Drives one conversation until the user closes it or input runs out.
pub async fn run_conversation<R: BufRead, W: Write>(
    runtime: &DialogueRuntime,
    templates: &TemplateCatalog,
    mut input: R,
    output: &mut W,
) -> anyhow::Result<ChatSummary> {
    let opening = runtime.start_session().await.context("could not open a conversation")?;
    let session_id = opening.session_id;
    write_turn(output, templates, &opening)?;

    let mut turns = 0;
    let mut line = String::new();
    loop {
        write!(output, "{PROMPT}")?;
        output.flush()?;

        line.clear();
        if input.read_line(&mut line).context("failed to read user input")? == 0 {
            writeln!(output)?;
            runtime.abort(session_id).await;
            return Ok(ChatSummary { session_id, turns, ending: ChatEnding::Abandoned });
        }
        let utterance = line.trim();
        if utterance.is_empty() {
            continue;
        }

        runtime.expire_idle(Utc::now()).await;
        turns += 1;
        match runtime.handle_turn(session_id, utterance).await {
            Ok(turn) => {
                write_turn(output, templates, &turn)?;
                if turn.closed {
                    return Ok(ChatSummary { session_id, turns, ending: ChatEnding::Closed });
                }
            }
            Err(error) if error.is_fatal() => {
                writeln!(output, "{}", error.user_message())?;
                return Err(anyhow::Error::new(error)
                    .context(format!("conversation {session_id} failed on turn {turns}")));
            }
            Err(error @ (DialogueError::UnknownSession(_) | DialogueError::SessionClosed(_))) => {
                writeln!(output, "{}", error.user_message())?;
                return Ok(ChatSummary { session_id, turns, ending: ChatEnding::Expired });
            }
            Err(error) => writeln!(output, "{}", error.user_message())?,
        }
    }
}

fn write_turn<W: Write>(
    output: &mut W,
    templates: &TemplateCatalog,
    turn: &TurnOutput,
) -> anyhow::Result<()> {
    if let Some(result) = &turn.recommendations {
        let listing =
            templates.render_recommendations(result).context("failed to render course plans")?;
        if !listing.is_empty() {
            writeln!(output, "{listing}")?;
        }
    }
    for prompt in &turn.prompts {
        writeln!(output, "{}", prompt.text)?;
    }
    Ok(())
}
