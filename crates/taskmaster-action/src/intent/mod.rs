//! Command interpreter.
//!
//! Slot-based grammar: the leading verb selects the intent kind and the
//! remaining tokens fill its parameters.
//!
//! ```text
//! inbox [max N]
//! summarize inbox [max N]
//! draft reply [to] <message-id> [saying <text...>]
//! schedule <title...> with <attendee...> [<N>min] [from <when>] [until <when>]
//! free [<N>min] [with <attendee...>] [from <when>] [until <when>] [max N]
//! status | today
//! ```
//!
//! `<when>` is `YYYY-MM-DD` or `YYYY-MM-DDTHH:MM`, both UTC. Parsing is
//! pure: no clock, no I/O.

pub mod patterns;
pub mod time_parser;

use chrono::{DateTime, Utc};

use crate::error::ParseError;
use crate::types::{FreeTimeQuery, Intent, MeetingRequest};

/// Parses command text into an [`Intent`].
#[derive(Debug, Clone)]
pub struct CommandInterpreter {
    /// Meeting length when no `<N>min` token is given.
    pub default_duration_minutes: u32,
    /// Messages summarised when `max` is omitted.
    pub default_max_results: u32,
    /// Slots returned by `free` when `max` is omitted.
    pub default_free_slots: usize,
}

impl Default for CommandInterpreter {
    fn default() -> Self {
        Self {
            default_duration_minutes: 30,
            default_max_results: 10,
            default_free_slots: 5,
        }
    }
}

impl CommandInterpreter {
    pub fn new(default_free_slots: usize) -> Self {
        Self {
            default_free_slots,
            ..Self::default()
        }
    }

    pub fn interpret(&self, text: &str) -> Result<Intent, ParseError> {
        let tokens: Vec<&str> = text.split_whitespace().collect();
        let (verb, rest) = tokens.split_first().ok_or(ParseError::Empty)?;

        match verb.to_ascii_lowercase().as_str() {
            "inbox" => self.parse_inbox(rest),
            "summarize" | "summarise" => match rest.split_first() {
                Some((next, rest)) if next.eq_ignore_ascii_case("inbox") => {
                    self.parse_inbox(rest)
                }
                _ => Err(ParseError::UnknownCommand {
                    verb: verb.to_string(),
                }),
            },
            "draft" => match rest.split_first() {
                Some((next, rest)) if next.eq_ignore_ascii_case("reply") => {
                    self.parse_draft_reply(rest)
                }
                _ => Err(ParseError::UnknownCommand {
                    verb: verb.to_string(),
                }),
            },
            "schedule" => self.parse_schedule(rest),
            "free" => self.parse_free(rest),
            "status" | "today" => {
                if let Some(extra) = rest.first() {
                    return Err(ParseError::invalid("argument", extra));
                }
                Ok(Intent::ShowStatus)
            }
            _ => Err(ParseError::UnknownCommand {
                verb: verb.to_string(),
            }),
        }
    }

    fn parse_inbox(&self, rest: &[&str]) -> Result<Intent, ParseError> {
        let args = Arguments::parse(rest)?;
        args.reject_unused(&[Slot::Max])?;
        Ok(Intent::SummarizeInbox {
            max_results: args.max.unwrap_or(self.default_max_results),
        })
    }

    fn parse_draft_reply(&self, rest: &[&str]) -> Result<Intent, ParseError> {
        let mut iter = rest.iter().copied().peekable();
        if iter.peek().is_some_and(|t| t.eq_ignore_ascii_case("to")) {
            iter.next();
        }

        let message_id = match iter.next() {
            Some(id) if !patterns::is_marker(id) => id.to_string(),
            _ => return Err(ParseError::missing("message_id")),
        };

        let instructions = match iter.next() {
            None => None,
            Some(t) if t.eq_ignore_ascii_case("saying") => {
                let text = iter.collect::<Vec<_>>().join(" ");
                if text.is_empty() {
                    return Err(ParseError::missing("instructions"));
                }
                Some(text)
            }
            Some(other) => return Err(ParseError::invalid("argument", other)),
        };

        Ok(Intent::DraftReply {
            message_id,
            instructions,
        })
    }

    fn parse_schedule(&self, rest: &[&str]) -> Result<Intent, ParseError> {
        let args = Arguments::parse(rest)?;
        args.reject_unused(&[
            Slot::Words,
            Slot::Attendees,
            Slot::Duration,
            Slot::From,
            Slot::Until,
        ])?;

        if args.attendees.is_empty() {
            return Err(ParseError::missing("attendees"));
        }

        let title = if args.words.is_empty() {
            "Meeting".to_string()
        } else {
            args.words.join(" ")
        };

        Ok(Intent::ScheduleMeeting(MeetingRequest {
            title,
            attendees: args.attendees,
            duration_minutes: args.duration.unwrap_or(self.default_duration_minutes),
            earliest: args.earliest,
            latest: args.latest,
        }))
    }

    fn parse_free(&self, rest: &[&str]) -> Result<Intent, ParseError> {
        let args = Arguments::parse(rest)?;
        args.reject_unused(&[
            Slot::Attendees,
            Slot::Duration,
            Slot::From,
            Slot::Until,
            Slot::Max,
        ])?;

        Ok(Intent::ShowFreeTime(FreeTimeQuery {
            attendees: args.attendees,
            duration_minutes: args.duration.unwrap_or(self.default_duration_minutes),
            earliest: args.earliest,
            latest: args.latest,
            max_results: args
                .max
                .map(|m| m as usize)
                .unwrap_or(self.default_free_slots),
        }))
    }
}

// -----------------------------------------------------------------
// Argument slots
// -----------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Words,
    Attendees,
    Duration,
    From,
    Until,
    Max,
}

#[derive(Debug, Default)]
struct Arguments {
    words: Vec<String>,
    attendees: Vec<String>,
    duration: Option<u32>,
    earliest: Option<DateTime<Utc>>,
    latest: Option<DateTime<Utc>>,
    max: Option<u32>,
    // Raw token that filled each slot, for error reporting.
    first_word: Option<String>,
    saw_with: bool,
}

impl Arguments {
    fn parse(tokens: &[&str]) -> Result<Self, ParseError> {
        let mut args = Arguments::default();
        let mut in_attendees = false;
        let mut iter = tokens.iter().copied();

        while let Some(token) = iter.next() {
            match token.to_ascii_lowercase().as_str() {
                "with" => {
                    in_attendees = true;
                    args.saw_with = true;
                }
                "from" => {
                    args.earliest = Some(take_when(&mut iter, "from")?);
                    in_attendees = false;
                }
                "until" => {
                    args.latest = Some(take_when(&mut iter, "until")?);
                    in_attendees = false;
                }
                "max" => {
                    args.max = Some(take_count(&mut iter)?);
                    in_attendees = false;
                }
                _ => {
                    if let Some(minutes) = patterns::parse_duration(token) {
                        if minutes == 0 {
                            return Err(ParseError::invalid("duration", token));
                        }
                        args.duration = Some(minutes);
                    } else if in_attendees {
                        for attendee in patterns::split_attendees(token) {
                            if !args
                                .attendees
                                .iter()
                                .any(|a| a.eq_ignore_ascii_case(attendee))
                            {
                                args.attendees.push(attendee.to_string());
                            }
                        }
                    } else {
                        if args.first_word.is_none() {
                            args.first_word = Some(token.to_string());
                        }
                        args.words.push(token.to_string());
                    }
                }
            }
        }

        if let (Some(earliest), Some(latest)) = (args.earliest, args.latest) {
            if latest <= earliest {
                return Err(ParseError::invalid("until", &latest.to_rfc3339()));
            }
        }

        Ok(args)
    }

    /// Fail on any filled slot the command does not accept.
    fn reject_unused(&self, allowed: &[Slot]) -> Result<(), ParseError> {
        let check = |slot: Slot, filled: bool, name: &str| {
            if filled && !allowed.contains(&slot) {
                Err(ParseError::invalid("argument", name))
            } else {
                Ok(())
            }
        };
        check(
            Slot::Words,
            !self.words.is_empty(),
            self.first_word.as_deref().unwrap_or(""),
        )?;
        check(Slot::Attendees, self.saw_with, "with")?;
        check(Slot::Duration, self.duration.is_some(), "duration")?;
        check(Slot::From, self.earliest.is_some(), "from")?;
        check(Slot::Until, self.latest.is_some(), "until")?;
        check(Slot::Max, self.max.is_some(), "max")?;
        Ok(())
    }
}

fn take_when<'a>(
    iter: &mut impl Iterator<Item = &'a str>,
    name: &str,
) -> Result<DateTime<Utc>, ParseError> {
    let token = iter.next().ok_or_else(|| ParseError::missing(name))?;
    time_parser::parse_when(token).ok_or_else(|| ParseError::invalid(name, token))
}

fn take_count<'a>(iter: &mut impl Iterator<Item = &'a str>) -> Result<u32, ParseError> {
    let token = iter.next().ok_or_else(|| ParseError::missing("max"))?;
    match token.parse::<u32>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(ParseError::invalid("max", token)),
    }
}
