//! Controller clearance shorthand.
//!
//! A command string is a run of whitespace separated tokens, each introduced
//! by a single discriminator letter (`H`, `L`, `R`, `C`, `A`, `S`, `D`, `E`).
//! Tokens are executed one by one as soon as they parse; the first failure
//! stops the run and reports the failing token plus everything after it.

use std::num::ParseIntError;

use thiserror::Error;

use crate::{HeadingAssignment, SimError, TurnMethod};

/// One clearance, ready to apply to an aircraft.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedCommand {
    AssignHeading(HeadingAssignment),
    AssignAltitude {
        altitude: i32,
    },
    AssignTemporaryAltitude {
        altitude: i32,
    },
    /// Zero clears any speed restriction.
    AssignSpeed {
        speed: i32,
    },
    DirectToFix {
        fix: String,
    },
    DepartFixOnHeading {
        fix: String,
        heading: i32,
    },
    CrossFixAt {
        fix: String,
        altitude: Option<i32>,
        speed: Option<i32>,
    },
    ExpectApproach {
        approach: String,
    },
    ClearedApproach {
        approach: String,
        straight_in: bool,
    },
    GoAround,
    DeleteAircraft,
}

#[derive(Debug, Error)]
pub enum CommandParseError {
    #[error("invalid command syntax: {0}")]
    InvalidSyntax(String),
    #[error("invalid integer '{value}' for {context}: {source}")]
    InvalidInteger {
        value: String,
        context: &'static str,
        source: ParseIntError,
    },
}

impl From<CommandParseError> for SimError {
    fn from(err: CommandParseError) -> Self {
        match err {
            CommandParseError::InvalidSyntax(_) => SimError::InvalidCommandSyntax,
            CommandParseError::InvalidInteger { value, .. } => SimError::InvalidNumber(value),
        }
    }
}

/// Receiver for parsed clearances; implemented by the simulation for one
/// (controller, aircraft) pair.
pub trait ClearanceSink {
    fn is_known_fix(&self, fix: &str) -> bool;

    fn apply(&mut self, command: ParsedCommand) -> Result<(), SimError>;
}

pub fn tokenize(commands: &str) -> Vec<&str> {
    commands.split_whitespace().collect()
}

/// Parses and applies each token of `commands` in order.
///
/// Clearances applied before a failure stay in effect. The returned
/// [`SimError::CommandExecution`] carries the failing token and all tokens
/// after it, verbatim.
pub fn run_aircraft_commands<S: ClearanceSink>(
    commands: &str,
    sink: &mut S,
) -> Result<(), SimError> {
    let tokens = tokenize(commands);
    for (index, token) in tokens.iter().enumerate() {
        let outcome = parse_clearance(token, |fix| sink.is_known_fix(fix))
            .map_err(SimError::from)
            .and_then(|command| sink.apply(command));
        if let Err(cause) = outcome {
            let remaining = tokens[index..].iter().map(|t| t.to_string()).collect();
            return Err(SimError::command_execution(cause, remaining));
        }
    }
    Ok(())
}

/// Parses a single shorthand token.
///
/// `is_known_fix` is consulted only to decide whether a bare `D` token names
/// a fix for a direct-to clearance.
pub fn parse_clearance<F>(command: &str, is_known_fix: F) -> Result<ParsedCommand, CommandParseError>
where
    F: Fn(&str) -> bool,
{
    let mut chars = command.chars();
    let Some(first) = chars.next() else {
        return Err(syntax(command));
    };
    let rest = chars.as_str();

    match first {
        'D' => parse_direct(command, rest, is_known_fix),
        'H' => {
            if rest.is_empty() {
                Ok(ParsedCommand::AssignHeading(HeadingAssignment::Present))
            } else {
                let heading = parse_i32(rest, "heading")?;
                Ok(ParsedCommand::AssignHeading(HeadingAssignment::Heading {
                    heading,
                    turn: TurnMethod::Closest,
                }))
            }
        }
        'L' | 'R' => parse_turn(first, rest),
        'C' | 'A' => parse_altitude_or_approach(command, first, rest),
        'S' => {
            if rest.is_empty() {
                Ok(ParsedCommand::AssignSpeed { speed: 0 })
            } else {
                let speed = parse_i32(rest, "speed")?;
                Ok(ParsedCommand::AssignSpeed { speed })
            }
        }
        'E' => {
            if rest.is_empty() {
                Err(syntax(command))
            } else {
                Ok(ParsedCommand::ExpectApproach {
                    approach: rest.to_string(),
                })
            }
        }
        _ => Err(syntax(command)),
    }
}

fn parse_direct<F>(command: &str, rest: &str, is_known_fix: F) -> Result<ParsedCommand, CommandParseError>
where
    F: Fn(&str) -> bool,
{
    if rest.contains('/') {
        let mut components = rest.split('/');
        let fix = components.next().unwrap_or_default().to_string();
        let modifiers: Vec<&str> = components.collect();
        if modifiers.first().is_some_and(|m| m.starts_with('H')) {
            // Depart <fix> heading <hdg>
            let heading = parse_i32(&modifiers[0][1..], "depart heading")?;
            return Ok(ParsedCommand::DepartFixOnHeading { fix, heading });
        }
        return parse_cross_fix(command, fix, &modifiers);
    }

    if rest.starts_with(|c: char| c.is_ascii_digit()) {
        let altitude = parse_i32(rest, "altitude")?;
        return Ok(ParsedCommand::AssignAltitude {
            altitude: 100 * altitude,
        });
    }

    if is_known_fix(rest) {
        Ok(ParsedCommand::DirectToFix {
            fix: rest.to_string(),
        })
    } else {
        Err(syntax(command))
    }
}

fn parse_turn(direction: char, rest: &str) -> Result<ParsedCommand, CommandParseError> {
    // "L20D" turns 20 degrees; "L270" turns left to heading 270.
    if rest.len() > 1 {
        if let Some(degrees) = rest.strip_suffix('D') {
            let degrees = parse_i32(degrees, "turn degrees")?;
            let assignment = if direction == 'L' {
                HeadingAssignment::LeftDegrees(degrees)
            } else {
                HeadingAssignment::RightDegrees(degrees)
            };
            return Ok(ParsedCommand::AssignHeading(assignment));
        }
    }

    let heading = parse_i32(rest, "heading")?;
    let turn = if direction == 'L' {
        TurnMethod::Left
    } else {
        TurnMethod::Right
    };
    Ok(ParsedCommand::AssignHeading(HeadingAssignment::Heading {
        heading,
        turn,
    }))
}

fn parse_altitude_or_approach(
    command: &str,
    first: char,
    rest: &str,
) -> Result<ParsedCommand, CommandParseError> {
    if command.len() > 4 && command.starts_with("CSI") && !is_all_digits(&command[3..]) {
        return Ok(ParsedCommand::ClearedApproach {
            approach: command[3..].to_string(),
            straight_in: true,
        });
    }

    if first == 'C' && command.len() > 2 && !is_all_digits(rest) {
        if rest.contains('/') {
            let mut components = rest.split('/');
            let fix = components.next().unwrap_or_default().to_string();
            let modifiers: Vec<&str> = components.collect();
            return parse_cross_fix(command, fix, &modifiers);
        }
        return Ok(ParsedCommand::ClearedApproach {
            approach: rest.to_string(),
            straight_in: false,
        });
    }

    let altitude = parse_i32(rest, "altitude")?;
    Ok(ParsedCommand::AssignAltitude {
        altitude: 100 * altitude,
    })
}

/// `/A` sub-tokens are altitudes in hundreds of feet, `/S` sub-tokens speeds.
fn parse_cross_fix(
    command: &str,
    fix: String,
    modifiers: &[&str],
) -> Result<ParsedCommand, CommandParseError> {
    let mut altitude = None;
    let mut speed = None;
    for modifier in modifiers {
        if let Some(value) = modifier.strip_prefix('A') {
            altitude = Some(100 * parse_i32(value, "crossing altitude")?);
        } else if let Some(value) = modifier.strip_prefix('S') {
            speed = Some(parse_i32(value, "crossing speed")?);
        } else {
            return Err(syntax(command));
        }
    }
    Ok(ParsedCommand::CrossFixAt {
        fix,
        altitude,
        speed,
    })
}

fn is_all_digits(value: &str) -> bool {
    value.chars().all(|c| c.is_ascii_digit())
}

fn syntax(command: &str) -> CommandParseError {
    CommandParseError::InvalidSyntax(command.to_string())
}

fn parse_i32(value: &str, context: &'static str) -> Result<i32, CommandParseError> {
    value
        .parse::<i32>()
        .map_err(|source| CommandParseError::InvalidInteger {
            value: value.to_string(),
            context,
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn known(fix: &str) -> bool {
        matches!(fix, "OSIS" | "CAMRN" | "ROBER")
    }

    fn parse(command: &str) -> Result<ParsedCommand, CommandParseError> {
        parse_clearance(command, known)
    }

    #[derive(Default)]
    struct Recorder {
        applied: Vec<ParsedCommand>,
        reject_fix: Option<&'static str>,
    }

    impl ClearanceSink for Recorder {
        fn is_known_fix(&self, fix: &str) -> bool {
            known(fix)
        }

        fn apply(&mut self, command: ParsedCommand) -> Result<(), SimError> {
            if let ParsedCommand::DirectToFix { fix } = &command {
                if Some(fix.as_str()) == self.reject_fix {
                    return Err(SimError::UnknownFix(fix.clone()));
                }
            }
            self.applied.push(command);
            Ok(())
        }
    }

    #[test]
    fn heading_defaults_to_closest_turn() {
        assert_eq!(
            parse("H180").unwrap(),
            ParsedCommand::AssignHeading(HeadingAssignment::Heading {
                heading: 180,
                turn: TurnMethod::Closest,
            })
        );
        assert_eq!(
            parse("H").unwrap(),
            ParsedCommand::AssignHeading(HeadingAssignment::Present)
        );
    }

    #[test]
    fn left_and_right_distinguish_relative_turns() {
        assert_eq!(
            parse("L20D").unwrap(),
            ParsedCommand::AssignHeading(HeadingAssignment::LeftDegrees(20))
        );
        assert_eq!(
            parse("R090").unwrap(),
            ParsedCommand::AssignHeading(HeadingAssignment::Heading {
                heading: 90,
                turn: TurnMethod::Right,
            })
        );
        // Too short to be a relative turn, so "D" is parsed as a heading.
        assert!(matches!(
            parse("LD"),
            Err(CommandParseError::InvalidInteger { .. })
        ));
    }

    #[test]
    fn depart_fix_heading_uses_text_before_slash() {
        assert_eq!(
            parse("D/H270").unwrap(),
            ParsedCommand::DepartFixOnHeading {
                fix: String::new(),
                heading: 270,
            }
        );
        assert_eq!(
            parse("DCAMRN/H090").unwrap(),
            ParsedCommand::DepartFixOnHeading {
                fix: "CAMRN".to_string(),
                heading: 90,
            }
        );
    }

    #[test]
    fn direct_fix_requires_known_location() {
        assert_eq!(
            parse("DOSIS").unwrap(),
            ParsedCommand::DirectToFix {
                fix: "OSIS".to_string()
            }
        );
        assert!(matches!(
            parse("DWHAT"),
            Err(CommandParseError::InvalidSyntax(_))
        ));
        assert!(matches!(parse("D"), Err(CommandParseError::InvalidSyntax(_))));
    }

    #[test]
    fn d_with_digit_is_altitude() {
        assert_eq!(
            parse("D40").unwrap(),
            ParsedCommand::AssignAltitude { altitude: 4000 }
        );
    }

    #[test]
    fn d_with_slash_and_altitude_is_crossing_restriction() {
        assert_eq!(
            parse("DROBER/A50/S210").unwrap(),
            ParsedCommand::CrossFixAt {
                fix: "ROBER".to_string(),
                altitude: Some(5000),
                speed: Some(210),
            }
        );
    }

    #[test]
    fn straight_in_approach_beats_altitude() {
        assert_eq!(
            parse("CSIILS28").unwrap(),
            ParsedCommand::ClearedApproach {
                approach: "ILS28".to_string(),
                straight_in: true,
            }
        );
    }

    #[test]
    fn c_prefix_disambiguation() {
        assert_eq!(
            parse("C080").unwrap(),
            ParsedCommand::AssignAltitude { altitude: 8000 }
        );
        assert_eq!(
            parse("A110").unwrap(),
            ParsedCommand::AssignAltitude { altitude: 11000 }
        );
        assert_eq!(
            parse("CI2L").unwrap(),
            ParsedCommand::ClearedApproach {
                approach: "I2L".to_string(),
                straight_in: false,
            }
        );
        assert_eq!(
            parse("CCAMRN/A40").unwrap(),
            ParsedCommand::CrossFixAt {
                fix: "CAMRN".to_string(),
                altitude: Some(4000),
                speed: None,
            }
        );
        // "CSI" followed only by digits is not straight-in; the remainder is
        // still non-numeric, so it names an ordinary approach.
        assert_eq!(
            parse("CSI123").unwrap(),
            ParsedCommand::ClearedApproach {
                approach: "SI123".to_string(),
                straight_in: false,
            }
        );
        assert!(matches!(
            parse("CCAMRN/Q40"),
            Err(CommandParseError::InvalidSyntax(_))
        ));
        assert!(matches!(
            parse("CCAMRN/"),
            Err(CommandParseError::InvalidSyntax(_))
        ));
    }

    #[test]
    fn bare_speed_clears_restriction() {
        assert_eq!(parse("S").unwrap(), ParsedCommand::AssignSpeed { speed: 0 });
        assert_eq!(
            parse("S250").unwrap(),
            ParsedCommand::AssignSpeed { speed: 250 }
        );
    }

    #[test]
    fn expect_requires_approach_name() {
        assert_eq!(
            parse("EI2L").unwrap(),
            ParsedCommand::ExpectApproach {
                approach: "I2L".to_string()
            }
        );
        assert!(parse("E").is_err());
        assert!(parse("X180").is_err());
    }

    #[test]
    fn partial_failure_keeps_prior_clearances() {
        let mut sink = Recorder::default();
        let err = run_aircraft_commands("C080 L20D QZ S250", &mut sink).unwrap_err();
        assert_eq!(
            sink.applied,
            vec![
                ParsedCommand::AssignAltitude { altitude: 8000 },
                ParsedCommand::AssignHeading(HeadingAssignment::LeftDegrees(20)),
            ]
        );
        match err {
            SimError::CommandExecution { cause, remaining } => {
                assert_eq!(*cause, SimError::InvalidCommandSyntax);
                assert_eq!(remaining, vec!["QZ".to_string(), "S250".to_string()]);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn execution_failure_reports_failing_token() {
        let mut sink = Recorder {
            reject_fix: Some("OSIS"),
            ..Default::default()
        };
        let err = run_aircraft_commands("H090  DOSIS", &mut sink).unwrap_err();
        assert_eq!(sink.applied.len(), 1);
        assert_eq!(err.remaining(), ["DOSIS".to_string()]);
    }

    #[test]
    fn unknown_fix_reports_remaining() {
        let mut sink = Recorder::default();
        let err = run_aircraft_commands("DNOPE", &mut sink).unwrap_err();
        assert!(sink.applied.is_empty());
        assert_eq!(err.remaining(), ["DNOPE".to_string()]);
    }

    #[test]
    fn empty_command_string_is_a_no_op() {
        let mut sink = Recorder::default();
        run_aircraft_commands("   ", &mut sink).unwrap();
        assert!(sink.applied.is_empty());
    }
}
