use once_cell::sync::Lazy;
use regex::Regex;

use crate::dedup::DedupGuard;

/// Lines scanned per snapshot when looking for prompts
pub const SNAPSHOT_LINES: usize = 20;

/// Most lines kept above the options as question text
const MAX_QUESTION_LINES: usize = 4;

/// A numbered choice in a selection prompt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptOption {
    /// Number shown on screen; typing it selects the option
    pub number: u32,
    pub label: String,
}

/// An interactive selection prompt parsed from the pane
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptEvent {
    /// May be empty when nothing readable sits above the options
    pub question: String,
    /// Never empty
    pub options: Vec<PromptOption>,
}

impl PromptEvent {
    pub fn labels(&self) -> Vec<&str> {
        self.options.iter().map(|o| o.label.as_str()).collect()
    }

    /// Question followed by the numbered options, as shown to the user
    pub fn render(&self) -> String {
        let options = self
            .options
            .iter()
            .map(|o| format!("{}. {}", o.number, o.label))
            .collect::<Vec<_>>()
            .join("\n");
        if self.question.is_empty() {
            options
        } else {
            format!("{}\n\n{}", self.question, options)
        }
    }
}

/// Escape sequences: CSI, OSC (BEL-terminated) and charset selection
static RE_ANSI: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\x1b\[[0-9;?]*[ -/]*[@-~]|\x1b\][^\x07\x1b]*(\x07|\x1b\\)|\x1b[()][0-9A-B]").unwrap()
});

/// Selection UI chrome that means a prompt is on screen
static RE_PROMPT_MARKER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(enter to select|enter to confirm|esc to cancel|do you want to allow)").unwrap()
});

/// Navigation hints; never part of the question or options
static RE_NAV_HINT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(enter to select|enter to confirm|esc to cancel|tab to amend|to navigate)").unwrap()
});

/// "❯ 1. Yes" or "  2. No"
static RE_OPTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[\s❯>›]*(\d{1,2})[.)]\s+(.+?)\s*$").unwrap());

static RE_INPUT_LINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*[❯>]\s*$").unwrap());

static RE_RATE_LIMIT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(hit your limit|usage limit reached|limit will reset|/upgrade to increase)")
        .unwrap()
});

/// "resets Jan 30 at 12pm (America/Mazatlan)" or "reset at 6pm (Europe/Madrid)"
static RE_RESET_TIME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(resets?\s+.{5,50}?\)|reset at\s+.{3,30}?\))").unwrap()
});

fn is_box_drawing(c: char) -> bool {
    ('\u{2500}'..='\u{257F}').contains(&c)
}

/// Remove escape sequences and control characters, keeping newlines and tabs
pub fn sanitize(text: &str) -> String {
    RE_ANSI
        .replace_all(text, "")
        .chars()
        .filter(|&c| c == '\n' || c == '\t' || !(c.is_control() || is_format_char(c)))
        .collect()
}

fn is_format_char(c: char) -> bool {
    matches!(c, '\u{200B}'..='\u{200F}' | '\u{2060}'..='\u{2064}' | '\u{FEFF}')
}

/// Strip box frame glyphs and whitespace from both ends of a line
fn strip_frame(line: &str) -> &str {
    line.trim_matches(|c: char| c.is_whitespace() || is_box_drawing(c))
}

/// A horizontal rule or an empty line
fn is_filler(line: &str) -> bool {
    line.chars()
        .all(|c| c.is_whitespace() || is_box_drawing(c) || matches!(c, '-' | '_' | '═'))
}

pub fn has_prompt_marker(snapshot: &str) -> bool {
    RE_PROMPT_MARKER.is_match(&sanitize(snapshot))
}

fn parse_option(line: &str) -> Option<PromptOption> {
    let caps = RE_OPTION.captures(line)?;
    Some(PromptOption {
        number: caps[1].parse().ok()?,
        label: caps[2].trim().to_string(),
    })
}

fn follows(options: &[PromptOption], next: &PromptOption) -> bool {
    options.last().is_some_and(|last| last.number + 1 == next.number)
}

/// Parse the selection prompt nearest the bottom of a snapshot.
///
/// Options are the last run of consecutively numbered lines. Description
/// lines between two options belong to the option above them, so a restart
/// in numbering is what separates an earlier list from the prompt. The
/// question is the block of text directly above the first option. `None`
/// when there are no options.
pub fn parse_prompt(snapshot: &str) -> Option<PromptEvent> {
    let clean = sanitize(snapshot);
    let lines: Vec<&str> = clean
        .lines()
        .map(strip_frame)
        .filter(|line| !RE_NAV_HINT.is_match(line))
        .collect();

    let mut blocks: Vec<(usize, Vec<PromptOption>)> = Vec::new();
    for (i, line) in lines.iter().enumerate() {
        let Some(option) = parse_option(line) else {
            continue;
        };
        match blocks.last_mut() {
            Some((_, options)) if follows(options, &option) => options.push(option),
            _ => blocks.push((i, vec![option])),
        }
    }

    let (start, options) = blocks.pop()?;

    let mut question: Vec<&str> = Vec::new();
    for line in lines[..start].iter().rev().skip_while(|l| is_filler(l)) {
        if is_filler(line) || RE_OPTION.is_match(line) || question.len() == MAX_QUESTION_LINES {
            break;
        }
        let cleaned = line
            .trim_start_matches(|c: char| matches!(c, '❯' | '>' | '?' | '❓') || c.is_whitespace())
            .trim();
        if !cleaned.is_empty() {
            question.push(cleaned);
        }
    }
    question.reverse();

    Some(PromptEvent {
        question: question.join("\n"),
        options,
    })
}

/// Whether the agent is showing an empty input line
pub fn shows_input_line(snapshot: &str) -> bool {
    sanitize(snapshot)
        .lines()
        .map(|line| line.trim_matches(|c: char| c.is_whitespace() || is_box_drawing(c)))
        .any(|line| RE_INPUT_LINE.is_match(line))
}

/// Detector state between snapshots
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DetectorState {
    #[default]
    Idle,
    PromptVisible,
}

/// Result of feeding one snapshot to the detector
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Observation {
    /// No prompt, and none was showing before
    Quiet,
    /// The prompt that was showing has gone away
    Cleared,
    /// Marker present but nothing parsable yet, e.g. mid-render
    Malformed,
    Prompt(PromptEvent),
}

/// Tracks selection prompts across successive snapshots
#[derive(Debug, Default)]
pub struct PromptDetector {
    state: DetectorState,
}

impl PromptDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> DetectorState {
        self.state
    }

    pub fn observe(&mut self, snapshot: &str) -> Observation {
        if !has_prompt_marker(snapshot) {
            let was_visible = self.state == DetectorState::PromptVisible;
            self.state = DetectorState::Idle;
            return if was_visible {
                Observation::Cleared
            } else {
                Observation::Quiet
            };
        }

        self.state = DetectorState::PromptVisible;
        match parse_prompt(snapshot) {
            Some(event) => Observation::Prompt(event),
            None => Observation::Malformed,
        }
    }
}

/// Usage-limit change worth telling the user about
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateLimitNotice {
    Reached {
        /// Limit lines with tree decoration removed
        summary: String,
        reset: Option<String>,
    },
    Cleared,
}

/// Watches snapshots for the agent's usage-limit banner
#[derive(Debug, Default)]
pub struct RateLimitWatch {
    dedup: DedupGuard,
    waiting: bool,
}

impl RateLimitWatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, snapshot: &str) -> Option<RateLimitNotice> {
        let clean = sanitize(snapshot);
        if !RE_RATE_LIMIT.is_match(&clean) {
            self.dedup.reset();
            if self.waiting {
                self.waiting = false;
                return Some(RateLimitNotice::Cleared);
            }
            return None;
        }

        let summary = clean
            .lines()
            .map(strip_frame)
            .filter(|line| RE_RATE_LIMIT.is_match(line))
            .collect::<Vec<_>>()
            .join("\n");
        if summary.is_empty() || !self.dedup.should_send_text(&summary) {
            return None;
        }

        self.waiting = true;
        let reset = RE_RESET_TIME
            .find(&clean)
            .map(|m| m.as_str().trim().trim_end_matches('.').to_string());
        Some(RateLimitNotice::Reached { summary, reset })
    }
}
