//! Parsed commands.
//!
//! [`Command::parse`] turns a command name plus raw arguments into a typed
//! [`Command`], doing every arity and argument check up front. Nothing in
//! this module touches the keyspace, so a command that fails to parse can
//! never leave a partial mutation behind.

use crate::commands::CommandError;
use crate::storage::value::parse_canonical_i64;
use crate::storage::{ExpiryUpdate, SetCondition, SetOptions};
use bytes::Bytes;
use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Ping(Option<Bytes>),
    Echo(Bytes),
    /// `SET key value [EX seconds | PX milliseconds | KEEPTTL] [NX | XX]`
    Set {
        key: Bytes,
        value: Bytes,
        options: SetOptions,
    },
    Get {
        key: Bytes,
    },
    Del {
        keys: Vec<Bytes>,
    },
    Exists {
        keys: Vec<Bytes>,
    },
    Incr {
        key: Bytes,
    },
    IncrBy {
        key: Bytes,
        delta: i64,
    },
    Decr {
        key: Bytes,
    },
    DecrBy {
        key: Bytes,
        amount: i64,
    },
    /// `EXPIRE key seconds`; a non-positive value deletes the key.
    Expire {
        key: Bytes,
        seconds: i64,
    },
    Persist {
        key: Bytes,
    },
    Ttl {
        key: Bytes,
    },
    Pttl {
        key: Bytes,
    },
    Type {
        key: Bytes,
    },
    DbSize,
    FlushDb,
}

impl Command {
    /// Parses and validates a command. `name` is case-insensitive.
    pub fn parse(name: &str, args: &[Bytes]) -> Result<Self, CommandError> {
        let upper = name.to_ascii_uppercase();

        let command = match upper.as_str() {
            "PING" => match args {
                [] => Command::Ping(None),
                [message] => Command::Ping(Some(message.clone())),
                _ => return Err(CommandError::arity(&upper)),
            },
            "ECHO" => Command::Echo(single(&upper, args)?),
            "SET" => parse_set(args)?,
            "GET" => Command::Get {
                key: single(&upper, args)?,
            },
            "DEL" => Command::Del {
                keys: at_least_one(&upper, args)?,
            },
            "EXISTS" => Command::Exists {
                keys: at_least_one(&upper, args)?,
            },
            "INCR" => Command::Incr {
                key: single(&upper, args)?,
            },
            "DECR" => Command::Decr {
                key: single(&upper, args)?,
            },
            "INCRBY" => {
                let (key, delta) = key_and_integer(&upper, args)?;
                Command::IncrBy { key, delta }
            }
            "DECRBY" => {
                let (key, amount) = key_and_integer(&upper, args)?;
                Command::DecrBy { key, amount }
            }
            "EXPIRE" => {
                let (key, seconds) = key_and_integer(&upper, args)?;
                Command::Expire { key, seconds }
            }
            "PERSIST" => Command::Persist {
                key: single(&upper, args)?,
            },
            "TTL" => Command::Ttl {
                key: single(&upper, args)?,
            },
            "PTTL" => Command::Pttl {
                key: single(&upper, args)?,
            },
            "TYPE" => Command::Type {
                key: single(&upper, args)?,
            },
            "DBSIZE" => {
                none(&upper, args)?;
                Command::DbSize
            }
            "FLUSHDB" | "FLUSHALL" => match args {
                [] => Command::FlushDb,
                [mode] if is_flush_mode(mode) => Command::FlushDb,
                [_] => return Err(CommandError::Syntax),
                _ => return Err(CommandError::arity(&upper)),
            },
            _ => return Err(CommandError::UnknownCommand(name.to_string())),
        };

        Ok(command)
    }

    /// Canonical upper-case command name.
    pub fn name(&self) -> &'static str {
        match self {
            Command::Ping(_) => "PING",
            Command::Echo(_) => "ECHO",
            Command::Set { .. } => "SET",
            Command::Get { .. } => "GET",
            Command::Del { .. } => "DEL",
            Command::Exists { .. } => "EXISTS",
            Command::Incr { .. } => "INCR",
            Command::IncrBy { .. } => "INCRBY",
            Command::Decr { .. } => "DECR",
            Command::DecrBy { .. } => "DECRBY",
            Command::Expire { .. } => "EXPIRE",
            Command::Persist { .. } => "PERSIST",
            Command::Ttl { .. } => "TTL",
            Command::Pttl { .. } => "PTTL",
            Command::Type { .. } => "TYPE",
            Command::DbSize => "DBSIZE",
            Command::FlushDb => "FLUSHDB",
        }
    }

    /// The keys this command reads or writes.
    ///
    /// Keyspace-wide commands (`DBSIZE`, `FLUSHDB`) reference no single key.
    pub fn keys(&self) -> &[Bytes] {
        match self {
            Command::Set { key, .. }
            | Command::Get { key }
            | Command::Incr { key }
            | Command::IncrBy { key, .. }
            | Command::Decr { key }
            | Command::DecrBy { key, .. }
            | Command::Expire { key, .. }
            | Command::Persist { key }
            | Command::Ttl { key }
            | Command::Pttl { key }
            | Command::Type { key } => std::slice::from_ref(key),
            Command::Del { keys } | Command::Exists { keys } => keys,
            Command::Ping(_) | Command::Echo(_) | Command::DbSize | Command::FlushDb => &[],
        }
    }

    /// Returns true if the command may modify the keyspace.
    pub fn is_write(&self) -> bool {
        matches!(
            self,
            Command::Set { .. }
                | Command::Del { .. }
                | Command::Incr { .. }
                | Command::IncrBy { .. }
                | Command::Decr { .. }
                | Command::DecrBy { .. }
                | Command::Expire { .. }
                | Command::Persist { .. }
                | Command::FlushDb
        )
    }

    /// Returns true if the command can be kept live with `<CMD>.WATCH`.
    ///
    /// Watchable commands are pure reads whose result depends only on the
    /// keys returned by [`Command::keys`]. `TTL`/`PTTL` change with the clock
    /// alone and are not watchable.
    pub fn is_watchable(&self) -> bool {
        matches!(
            self,
            Command::Get { .. } | Command::Exists { .. } | Command::Type { .. }
        )
    }

}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())?;
        match self {
            Command::Ping(Some(arg)) | Command::Echo(arg) => write_arg(f, arg),
            Command::Set { key, value, .. } => {
                write_arg(f, key)?;
                write_arg(f, value)
            }
            Command::IncrBy { key, delta: n, .. }
            | Command::DecrBy { key, amount: n, .. }
            | Command::Expire { key, seconds: n } => {
                write_arg(f, key)?;
                write!(f, " {}", n)
            }
            _ => self.keys().iter().try_for_each(|key| write_arg(f, key)),
        }
    }
}

/// Writes one argument so the text reads back as the same inline command.
fn write_arg(f: &mut fmt::Formatter<'_>, arg: &[u8]) -> fmt::Result {
    match std::str::from_utf8(arg) {
        Ok(text) if !text.is_empty() && !text.chars().any(needs_quoting) => {
            write!(f, " {}", text)
        }
        _ => write!(f, " \"{}\"", arg.escape_ascii()),
    }
}

fn needs_quoting(c: char) -> bool {
    c.is_whitespace() || c.is_control() || matches!(c, '"' | '\'' | '\\')
}

fn single(command: &str, args: &[Bytes]) -> Result<Bytes, CommandError> {
    match args {
        [arg] => Ok(arg.clone()),
        _ => Err(CommandError::arity(command)),
    }
}

fn none(command: &str, args: &[Bytes]) -> Result<(), CommandError> {
    if args.is_empty() {
        Ok(())
    } else {
        Err(CommandError::arity(command))
    }
}

fn at_least_one(command: &str, args: &[Bytes]) -> Result<Vec<Bytes>, CommandError> {
    if args.is_empty() {
        Err(CommandError::arity(command))
    } else {
        Ok(args.to_vec())
    }
}

fn key_and_integer(command: &str, args: &[Bytes]) -> Result<(Bytes, i64), CommandError> {
    match args {
        [key, n] => Ok((key.clone(), parse_integer(n)?)),
        _ => Err(CommandError::arity(command)),
    }
}

fn parse_integer(arg: &[u8]) -> Result<i64, CommandError> {
    parse_canonical_i64(arg).ok_or(CommandError::NotAnInteger)
}

fn is_flush_mode(arg: &[u8]) -> bool {
    arg.eq_ignore_ascii_case(b"ASYNC") || arg.eq_ignore_ascii_case(b"SYNC")
}

fn parse_set(args: &[Bytes]) -> Result<Command, CommandError> {
    let [key, value, rest @ ..] = args else {
        return Err(CommandError::arity("SET"));
    };

    let mut options = SetOptions::default();
    let mut rest = rest.iter();

    while let Some(opt) = rest.next() {
        let opt = String::from_utf8_lossy(opt).to_ascii_uppercase();
        match opt.as_str() {
            "EX" | "PX" => {
                if options.expiry != ExpiryUpdate::Clear {
                    return Err(CommandError::Syntax);
                }
                let amount = parse_integer(rest.next().ok_or(CommandError::Syntax)?)?;
                if amount <= 0 {
                    return Err(CommandError::InvalidExpireTime("set".to_string()));
                }
                let millis = if opt == "EX" {
                    amount.checked_mul(1000)
                } else {
                    Some(amount)
                };
                let millis =
                    millis.ok_or_else(|| CommandError::InvalidExpireTime("set".to_string()))?;
                let ttl = Duration::from_millis(millis as u64);
                options.expiry = ExpiryUpdate::After(ttl);
            }
            "KEEPTTL" => {
                if options.expiry != ExpiryUpdate::Clear {
                    return Err(CommandError::Syntax);
                }
                options.expiry = ExpiryUpdate::Keep;
            }
            "NX" | "XX" => {
                if options.condition != SetCondition::Always {
                    return Err(CommandError::Syntax);
                }
                options.condition = if opt == "NX" {
                    SetCondition::IfAbsent
                } else {
                    SetCondition::IfPresent
                };
            }
            _ => return Err(CommandError::Syntax),
        }
    }

    Ok(Command::Set {
        key: key.clone(),
        value: value.clone(),
        options,
    })
}
