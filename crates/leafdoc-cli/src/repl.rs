//! Interactive follow-up chat about a single diagnosis.
//!
//! Launch with `leafdoc chat <image>`. Plain lines are questions; lines that
//! start with `/` are commands. Type `/help` for the list, Tab for completion.

use rustyline::completion::{Completer, Pair};
use rustyline::config::CompletionType;
use rustyline::error::ReadlineError;
use rustyline::highlight::Highlighter;
use rustyline::hint::Hinter;
use rustyline::validate::Validator;
use rustyline::{
    Cmd, ConditionalEventHandler, Config, Editor, Event, EventContext, EventHandler, Helper,
    KeyEvent, RepeatCount,
};

use leafdoc::{AugmentationAdapter, ConversationContext, DiagnosisEngine, LeafdocError};

use crate::render::render_outcome;

/// Available REPL commands.
const COMMANDS: &[(&str, &str)] = &[
    ("/diagnosis", "Show the diagnosis again"),
    ("/context", "Show the grounding context sent with each question"),
    ("/history", "Show the conversation so far"),
    ("/reset", "Forget the conversation, keep the diagnosis"),
    ("/clear", "Clear the screen"),
    ("/help", "Show available commands"),
    ("/exit", "Quit the chat"),
];

/// One parsed line of input.
#[derive(Debug, PartialEq, Eq)]
pub enum ReplInput<'a> {
    Empty,
    Command { name: &'a str, args: &'a str },
    Question(&'a str),
}

/// Split a raw line into a command or a question.
pub fn parse_line(line: &str) -> ReplInput<'_> {
    let line = line.trim();
    if line.is_empty() {
        return ReplInput::Empty;
    }
    match line.strip_prefix('/') {
        Some(rest) => {
            let mut parts = rest.splitn(2, ' ');
            let name = parts.next().unwrap_or("");
            let args = parts.next().unwrap_or("").trim();
            ReplInput::Command { name, args }
        }
        None => ReplInput::Question(line),
    }
}

struct ChatHelper;

impl Completer for ChatHelper {
    type Candidate = Pair;

    fn complete(
        &self,
        line: &str,
        pos: usize,
        _ctx: &rustyline::Context<'_>,
    ) -> rustyline::Result<(usize, Vec<Pair>)> {
        let input = &line[..pos];
        if !input.starts_with('/') || input.contains(' ') {
            return Ok((pos, Vec::new()));
        }

        let matches: Vec<Pair> = COMMANDS
            .iter()
            .filter(|(cmd, _)| cmd.starts_with(input))
            .map(|(cmd, desc)| Pair {
                display: format!("{cmd:<12} {desc}"),
                replacement: cmd.to_string(),
            })
            .collect();
        Ok((0, matches))
    }
}

impl Hinter for ChatHelper {
    type Hint = String;

    fn hint(&self, line: &str, pos: usize, _ctx: &rustyline::Context<'_>) -> Option<String> {
        if pos < line.len() || line.is_empty() {
            return None;
        }
        if line.starts_with('/') && !line.contains(' ') {
            for (cmd, _) in COMMANDS {
                if cmd.starts_with(line) && *cmd != line {
                    return Some(cmd[line.len()..].to_string());
                }
            }
        }
        None
    }
}

impl Highlighter for ChatHelper {}
impl Validator for ChatHelper {}
impl Helper for ChatHelper {}

struct TabCompleteOrAcceptHint;

impl ConditionalEventHandler for TabCompleteOrAcceptHint {
    fn handle(
        &self,
        _evt: &Event,
        _n: RepeatCount,
        _positive: bool,
        ctx: &EventContext<'_>,
    ) -> Option<Cmd> {
        if ctx.has_hint() {
            Some(Cmd::CompleteHint)
        } else {
            Some(Cmd::Complete)
        }
    }
}

/// Run the chat loop until `/exit` or EOF.
pub async fn run(
    engine: &DiagnosisEngine,
    adapter: &dyn AugmentationAdapter,
    conversation: &mut ConversationContext,
) -> anyhow::Result<()> {
    eprintln!();
    eprintln!(
        "  \x1b[32m\u{25c9}\x1b[0m \x1b[1mleafdoc v{}\x1b[0m \x1b[90m: ask about this diagnosis\x1b[0m",
        env!("CARGO_PKG_VERSION")
    );
    eprintln!();
    eprint!("{}", render_outcome(&conversation.outcome));
    eprintln!();
    eprintln!(
        "    Type a question, \x1b[36m/\x1b[0m for commands, \x1b[90m/exit\x1b[0m to quit."
    );
    eprintln!();

    let config = Config::builder()
        .history_ignore_space(true)
        .auto_add_history(true)
        .completion_type(CompletionType::List)
        .build();

    let mut rl: Editor<ChatHelper, rustyline::history::DefaultHistory> =
        Editor::with_config(config)?;
    rl.set_helper(Some(ChatHelper));
    rl.bind_sequence(
        KeyEvent::from('\t'),
        EventHandler::Conditional(Box::new(TabCompleteOrAcceptHint)),
    );

    let home = std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .unwrap_or_else(|_| ".".to_string());
    let hist_path = std::path::PathBuf::from(&home).join(".leafdoc_history");
    if hist_path.exists() {
        let _ = rl.load_history(&hist_path);
    }

    let prompt = " \x1b[36mleafdoc>\x1b[0m ";

    loop {
        let line = match rl.readline(prompt) {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) => {
                eprintln!("  \x1b[90m(Ctrl+C)\x1b[0m Type \x1b[1m/exit\x1b[0m to quit.");
                continue;
            }
            Err(ReadlineError::Eof) => break,
            Err(err) => {
                eprintln!("  Error: {err}");
                break;
            }
        };

        match parse_line(&line) {
            ReplInput::Empty => continue,
            ReplInput::Command { name, .. } => match name {
                "exit" | "quit" => break,
                "" | "help" | "h" | "?" => cmd_help(),
                "clear" | "cls" => eprint!("\x1b[2J\x1b[H"),
                "diagnosis" => eprint!("{}", render_outcome(&conversation.outcome)),
                "context" => cmd_context(conversation),
                "history" => cmd_history(conversation),
                "reset" => {
                    conversation.clear_history();
                    eprintln!("  Conversation cleared.");
                }
                _ => eprintln!("  Unknown command '/{name}'. Type /help for commands."),
            },
            ReplInput::Question(question) => {
                match engine.ask(adapter, conversation, question).await {
                    Ok(answer) => {
                        println!();
                        println!("{answer}");
                        println!();
                    }
                    Err(e @ LeafdocError::AugmentationNotConfigured(_)) => {
                        eprintln!("  \x1b[33m{e}\x1b[0m");
                        eprintln!("  The diagnosis above still stands; follow-up answers are unavailable.");
                    }
                    Err(e) if e.is_retryable() => {
                        eprintln!("  \x1b[33m{e}\x1b[0m Try the question again.");
                    }
                    Err(e) => eprintln!("  Error: {e}"),
                }
            }
        }
    }

    eprintln!("  \x1b[90m\u{2728}\x1b[0m Goodbye!");
    let _ = rl.save_history(&hist_path);

    Ok(())
}

fn cmd_help() {
    eprintln!();
    eprintln!("  Commands:");
    eprintln!();
    for (cmd, desc) in COMMANDS {
        eprintln!("    {cmd:<14} {desc}");
    }
    eprintln!();
    eprintln!("  Anything not starting with '/' is sent as a question.");
    eprintln!();
}

fn cmd_context(conversation: &ConversationContext) {
    let block = conversation.context_block();
    eprintln!();
    for line in block.text.lines() {
        eprintln!("  {line}");
    }
    if !block.grounded {
        eprintln!("  \x1b[90m(no reference entry; answers are not grounded)\x1b[0m");
    }
    eprintln!();
}

fn cmd_history(conversation: &ConversationContext) {
    if conversation.history.is_empty() {
        eprintln!("  No questions asked yet.");
        return;
    }
    eprintln!();
    for msg in &conversation.history {
        eprintln!("  \x1b[1m{}\x1b[0m: {}", msg.role.as_str(), msg.content);
    }
    eprintln!();
}
