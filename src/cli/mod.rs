//! Command-line interface for chansync.
//!
//! This module provides a CLI over a RocksDB-backed channel engine: identity
//! creation, channel creation and editing, posting, commenting, voting and
//! local search.

pub mod args;
pub mod commands;
pub mod utils;

use crate::Result;
use std::env;
use std::process;

pub use args::{Command, GlobalOptions, Invocation};
pub use commands::Output;

/// Main entry point for the CLI application
pub fn run() -> Result<()> {
    let argv: Vec<String> = env::args().skip(1).collect();
    let Invocation { options, command } = match args::parse_args(&argv) {
        Ok(invocation) => invocation,
        Err(e) => {
            eprintln!("Error parsing arguments: {}", e);
            args::print_usage();
            process::exit(1);
        }
    };

    let engine = utils::open_engine(&options)?;
    let out = Output::new(options.json);

    match command {
        Command::CreateIdentity { name } => commands::create_identity(&engine, out, &name),
        Command::Identities => commands::identities(&engine, out),
        Command::CreateChannel {
            name,
            description,
            author,
            circle_type,
            circle_id,
        } => commands::create_channel(&engine, out, name, description, author, circle_type, circle_id),
        Command::EditChannel {
            channel,
            name,
            description,
        } => commands::edit_channel(&engine, out, channel, name, description),
        Command::Post {
            channel,
            title,
            body,
            supersede,
            files,
            author,
        } => commands::post(&engine, out, channel, title, body, supersede, &files, author),
        Command::Comment {
            channel,
            post,
            body,
            author,
            parent,
        } => commands::comment(&engine, out, channel, post, body, author, parent),
        Command::Vote {
            channel,
            post,
            comment,
            vote,
            author,
        } => commands::vote(&engine, out, channel, post, comment, vote, author),
        Command::Subscribe { channel, subscribe } => {
            commands::subscribe(&engine, out, channel, subscribe)
        }
        Command::List => commands::list(&engine, out),
        Command::Show { channel } => commands::show(&engine, out, channel),
        Command::Search { text } => commands::search(&engine, out, &text),
    }
}
