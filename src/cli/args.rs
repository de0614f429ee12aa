//! Command-line argument parsing for chansync.

use crate::channel::{CircleId, CircleType, ContentHash, VoteType};
use crate::error::{ChansyncError, Result};
use crate::identity::IdentityId;
use std::path::PathBuf;

/// Options accepted before or after any command.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct GlobalOptions {
    /// Overrides the configured data directory.
    pub data_dir: Option<PathBuf>,
    /// JSON configuration file.
    pub config: Option<PathBuf>,
    /// Print replies as JSON.
    pub json: bool,
}

/// Command-line interface commands
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    CreateIdentity {
        name: String,
    },
    Identities,
    CreateChannel {
        name: String,
        description: String,
        author: Option<IdentityId>,
        circle_type: CircleType,
        circle_id: Option<CircleId>,
    },
    EditChannel {
        channel: ContentHash,
        name: Option<String>,
        description: Option<String>,
    },
    Post {
        channel: ContentHash,
        title: String,
        body: String,
        supersede: Option<ContentHash>,
        files: Vec<PathBuf>,
        author: Option<IdentityId>,
    },
    Comment {
        channel: ContentHash,
        post: ContentHash,
        body: String,
        author: IdentityId,
        parent: Option<ContentHash>,
    },
    Vote {
        channel: ContentHash,
        post: ContentHash,
        comment: ContentHash,
        vote: VoteType,
        author: IdentityId,
    },
    Subscribe {
        channel: ContentHash,
        subscribe: bool,
    },
    List,
    Show {
        channel: ContentHash,
    },
    Search {
        text: String,
    },
}

/// Parsed command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub options: GlobalOptions,
    pub command: Command,
}

/// Splits `--flag value` pairs and bare flags out of positional arguments.
struct ArgCursor {
    positional: Vec<String>,
    flags: Vec<(String, Option<String>)>,
}

/// Flags that never take a value.
const SWITCHES: &[&str] = &["--json", "--off"];

impl ArgCursor {
    fn new(args: &[String]) -> Result<Self> {
        let mut positional = Vec::new();
        let mut flags = Vec::new();
        let mut iter = args.iter();

        while let Some(arg) = iter.next() {
            if !arg.starts_with("--") {
                positional.push(arg.clone());
            } else if SWITCHES.contains(&arg.as_str()) {
                flags.push((arg.clone(), None));
            } else {
                let value = iter
                    .next()
                    .ok_or_else(|| ChansyncError::validation(format!("{} requires a value", arg)))?;
                flags.push((arg.clone(), Some(value.clone())));
            }
        }
        Ok(Self { positional, flags })
    }

    fn take_switch(&mut self, name: &str) -> bool {
        let before = self.flags.len();
        self.flags.retain(|(flag, _)| flag != name);
        self.flags.len() != before
    }

    fn take_value(&mut self, name: &str) -> Option<String> {
        let position = self.flags.iter().position(|(flag, _)| flag == name)?;
        self.flags.remove(position).1
    }

    fn take_values(&mut self, name: &str) -> Vec<String> {
        let mut values = Vec::new();
        while let Some(value) = self.take_value(name) {
            values.push(value);
        }
        values
    }

    fn positional(&self, index: usize, what: &str, usage: &str) -> Result<String> {
        self.positional.get(index).cloned().ok_or_else(|| {
            ChansyncError::validation(format!("missing {}. Usage: chansync {}", what, usage))
        })
    }

    fn finish(self) -> Result<()> {
        match self.flags.first() {
            Some((flag, _)) => Err(ChansyncError::validation(format!("Unknown option {}", flag))),
            None => Ok(()),
        }
    }
}

fn parse_hash(value: &str, what: &str) -> Result<ContentHash> {
    ContentHash::from_hex(value)
        .map_err(|e| ChansyncError::validation(format!("Invalid {} id: {}", what, e)))
}

fn parse_identity(value: &str) -> Result<IdentityId> {
    IdentityId::from_hex(value)
        .map_err(|e| ChansyncError::validation(format!("Invalid identity id: {}", e)))
}

fn required_identity(cursor: &mut ArgCursor, usage: &str) -> Result<IdentityId> {
    let value = cursor.take_value("--author").ok_or_else(|| {
        ChansyncError::validation(format!("--author is required. Usage: chansync {}", usage))
    })?;
    parse_identity(&value)
}

/// Parses arguments (without the program name) into an invocation.
pub fn parse_args(args: &[String]) -> Result<Invocation> {
    let mut cursor = ArgCursor::new(args)?;
    let options = GlobalOptions {
        data_dir: cursor.take_value("--data-dir").map(PathBuf::from),
        config: cursor.take_value("--config").map(PathBuf::from),
        json: cursor.take_switch("--json"),
    };

    let Some(name) = cursor.positional.first().cloned() else {
        return Err(ChansyncError::validation("No command given"));
    };

    let command = match name.as_str() {
        "create-identity" => Command::CreateIdentity {
            name: cursor.positional(1, "name", "create-identity <name>")?,
        },

        "identities" => Command::Identities,

        "create-channel" => {
            const USAGE: &str = "create-channel <name> [--description <text>] [--author <id>] [--circle <type>] [--circle-id <id>]";
            let circle_type = match cursor.take_value("--circle") {
                Some(value) => value.parse()?,
                None => CircleType::Public,
            };
            Command::CreateChannel {
                name: cursor.positional(1, "channel name", USAGE)?,
                description: cursor.take_value("--description").unwrap_or_default(),
                author: cursor
                    .take_value("--author")
                    .map(|v| parse_identity(&v))
                    .transpose()?,
                circle_type,
                circle_id: cursor.take_value("--circle-id").map(CircleId::new),
            }
        }

        "edit-channel" => {
            const USAGE: &str = "edit-channel <channel> [--name <name>] [--description <text>]";
            Command::EditChannel {
                channel: parse_hash(&cursor.positional(1, "channel", USAGE)?, "channel")?,
                name: cursor.take_value("--name"),
                description: cursor.take_value("--description"),
            }
        }

        "post" => {
            const USAGE: &str = "post <channel> <title> <body> [--supersede <post>] [--file <path>]... [--author <id>]";
            Command::Post {
                channel: parse_hash(&cursor.positional(1, "channel", USAGE)?, "channel")?,
                title: cursor.positional(2, "title", USAGE)?,
                body: cursor.positional(3, "body", USAGE)?,
                supersede: cursor
                    .take_value("--supersede")
                    .map(|v| parse_hash(&v, "post"))
                    .transpose()?,
                files: cursor
                    .take_values("--file")
                    .into_iter()
                    .map(PathBuf::from)
                    .collect(),
                author: cursor
                    .take_value("--author")
                    .map(|v| parse_identity(&v))
                    .transpose()?,
            }
        }

        "comment" => {
            const USAGE: &str = "comment <channel> <post> <body> --author <id> [--parent <comment>]";
            Command::Comment {
                channel: parse_hash(&cursor.positional(1, "channel", USAGE)?, "channel")?,
                post: parse_hash(&cursor.positional(2, "post", USAGE)?, "post")?,
                body: cursor.positional(3, "body", USAGE)?,
                author: required_identity(&mut cursor, USAGE)?,
                parent: cursor
                    .take_value("--parent")
                    .map(|v| parse_hash(&v, "comment"))
                    .transpose()?,
            }
        }

        "vote" => {
            const USAGE: &str = "vote <channel> <post> <comment> <up|down> --author <id>";
            let vote = match cursor.positional(4, "vote", USAGE)?.as_str() {
                "up" => VoteType::Up,
                "down" => VoteType::Down,
                other => {
                    return Err(ChansyncError::validation(format!(
                        "Vote must be 'up' or 'down', got '{}'",
                        other
                    )))
                }
            };
            Command::Vote {
                channel: parse_hash(&cursor.positional(1, "channel", USAGE)?, "channel")?,
                post: parse_hash(&cursor.positional(2, "post", USAGE)?, "post")?,
                comment: parse_hash(&cursor.positional(3, "comment", USAGE)?, "comment")?,
                vote,
                author: required_identity(&mut cursor, USAGE)?,
            }
        }

        "subscribe" => Command::Subscribe {
            channel: parse_hash(
                &cursor.positional(1, "channel", "subscribe <channel> [--off]")?,
                "channel",
            )?,
            subscribe: !cursor.take_switch("--off"),
        },

        "list" => Command::List,

        "show" => Command::Show {
            channel: parse_hash(&cursor.positional(1, "channel", "show <channel>")?, "channel")?,
        },

        "search" => Command::Search {
            text: cursor.positional(1, "search text", "search <text>")?,
        },

        other => {
            return Err(ChansyncError::validation(format!(
                "Unknown command '{}'",
                other
            )))
        }
    };

    cursor.finish()?;
    Ok(Invocation { options, command })
}

/// Print usage information
pub fn print_usage() {
    println!("chansync - versioned channel synchronization");
    println!("============================================");
    println!();
    println!("Usage: chansync [--data-dir <dir>] [--config <file>] [--json] <command> [args...]");
    println!();
    println!("Commands:");
    println!("  create-identity <name>                        Create an author identity");
    println!("  identities                                    List owned identities");
    println!("  create-channel <name> [--description <text>]  Create a channel");
    println!("      [--author <id>] [--circle <type>] [--circle-id <id>]");
    println!("  edit-channel <channel> [--name <name>]        Edit channel metadata");
    println!("      [--description <text>]");
    println!("  post <channel> <title> <body>                 Publish a post");
    println!("      [--supersede <post>] [--file <path>]... [--author <id>]");
    println!("  comment <channel> <post> <body> --author <id> Comment on a post");
    println!("      [--parent <comment>]");
    println!("  vote <channel> <post> <comment> <up|down> --author <id>");
    println!("  subscribe <channel> [--off]                   Follow or unfollow a channel");
    println!("  list                                          List known channels");
    println!("  show <channel>                                Show a channel's content");
    println!("  search <text>                                 Search known channels");
    println!();
    println!("Circle types: public, external, nodes-group");
    println!();
    println!("Examples:");
    println!("  chansync create-identity alice");
    println!("  chansync create-channel Tech --description 'gadgets and code'");
    println!("  chansync post <channel> Hello 'first post'");
    println!("  chansync --json list");
}
