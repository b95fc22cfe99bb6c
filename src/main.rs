use std::{borrow::Cow, ffi::OsString, io, num::TryFromIntError, path::Path, process::ExitCode};

use clap::Parser;
use error_stack::Report;
use log::info;
use thiserror::Error;
use x11rb::{
    errors::{ConnectError, ConnectionError, ReplyError, ReplyOrIdError},
    x11_utils::X11Error,
};

use crate::{payload::Payload, serve::Server};

mod encoding;
mod payload;
mod serve;

/// Own the X11 CLIPBOARD selection and serve a value to pasting clients.
///
/// The value stays available for as long as clipcast owns the selection or
/// still has transfers in flight; clipcast exits once another client takes
/// the clipboard over and the last transfer has drained.
#[derive(Parser, Debug)]
#[command(version, max_term_width = 100)]
#[cfg_attr(test, command(help_expected = true))]
struct Cli {
    /// Serve the canonicalized path of FILE, advertising file-manager
    /// targets so that pasting into a file manager copies the file.
    #[arg(short = 'f', long, conflicts_with = "contents")]
    file_name: bool,

    /// Serve the contents of FILE.
    #[arg(short = 'c', long)]
    contents: bool,

    /// The string to serve, or a file when -f or -c is given.
    #[arg(required = true, value_name = "STRING|FILE")]
    value: OsString,
}

const USAGE_ERROR: u8 = 1;
const FILE_ERROR: u8 = 2;
const RUNTIME_ERROR: u8 = 3;

#[derive(Error, Debug)]
pub enum CliError {
    #[error("{context}")]
    Io {
        error: io::Error,
        context: Cow<'static, str>,
    },
    #[error("failed to connect to X11 server")]
    X11Connect(#[from] ConnectError),
    #[error("X11 request failed")]
    X11Connection(#[from] ConnectionError),
    #[error("X11 reply failed")]
    X11Error(X11Error),
    #[error("failed to create X11 ID")]
    X11IdsExhausted,
}

impl From<X11Error> for CliError {
    fn from(value: X11Error) -> Self {
        Self::X11Error(value)
    }
}

impl From<ReplyError> for CliError {
    fn from(value: ReplyError) -> Self {
        match value {
            ReplyError::ConnectionError(e) => e.into(),
            ReplyError::X11Error(e) => e.into(),
        }
    }
}

impl From<ReplyOrIdError> for CliError {
    fn from(value: ReplyOrIdError) -> Self {
        match value {
            ReplyOrIdError::IdsExhausted => Self::X11IdsExhausted,
            ReplyOrIdError::ConnectionError(e) => e.into(),
            ReplyOrIdError::X11Error(e) => e.into(),
        }
    }
}

pub trait IoErr<Out> {
    fn map_io_err<I: Into<Cow<'static, str>>>(self, f: impl FnOnce() -> I) -> Out;
}

impl<T> IoErr<Result<T, CliError>> for Result<T, io::Error> {
    fn map_io_err<I: Into<Cow<'static, str>>>(self, context: impl FnOnce() -> I) -> Result<T, CliError> {
        self.map_err(|error| CliError::Io {
            error,
            context: context().into(),
        })
    }
}

impl<T> IoErr<Result<T, CliError>> for rustix::io::Result<T> {
    fn map_io_err<I: Into<Cow<'static, str>>>(self, context: impl FnOnce() -> I) -> Result<T, CliError> {
        self.map_err(io::Error::from).map_io_err(context)
    }
}

impl<T> IoErr<Result<T, CliError>> for Result<T, TryFromIntError> {
    fn map_io_err<I: Into<Cow<'static, str>>>(self, context: impl FnOnce() -> I) -> Result<T, CliError> {
        self.map_err(|error| io::Error::new(io::ErrorKind::InvalidInput, error))
            .map_io_err(context)
    }
}

#[derive(Error, Debug)]
enum Wrapper {
    #[error("{0}")]
    W(String),
}

fn main() -> ExitCode {
    #[cfg(not(debug_assertions))]
    error_stack::Report::install_debug_hook::<std::panic::Location>(|_, _| {});

    if cfg!(debug_assertions) {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    } else {
        env_logger::init();
    }

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let code = if e.use_stderr() { USAGE_ERROR } else { 0 };
            let _ = e.print();
            return ExitCode::from(code);
        }
    };

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let code = match e {
                CliError::Io { .. } => FILE_ERROR,
                _ => RUNTIME_ERROR,
            };
            eprintln!("Error: {:?}", into_report(e));
            ExitCode::from(code)
        }
    }
}

fn into_report(cli_err: CliError) -> Report<Wrapper> {
    let wrapper = Wrapper::W(cli_err.to_string());
    match cli_err {
        CliError::Io { error, context } => Report::new(error)
            .attach_printable(context)
            .change_context(wrapper),
        CliError::X11Connect(e) => Report::new(e).change_context(wrapper),
        CliError::X11Connection(e) => Report::new(e).change_context(wrapper),
        CliError::X11Error(e) => Report::new(wrapper).attach_printable(format!("{e:?}")),
        CliError::X11IdsExhausted => Report::new(wrapper),
    }
}

fn run(
    Cli {
        file_name,
        contents,
        value,
    }: Cli,
) -> Result<(), CliError> {
    info!("Starting clipcast v{}.", env!("CARGO_PKG_VERSION"));

    let payload = if contents {
        Payload::contents(Path::new(&value))?
    } else if file_name {
        Payload::file_name(Path::new(&value))?
    } else {
        Payload::literal(value)
    };

    let mut server = Server::bootstrap(payload.bytes(), payload.is_file())?;
    server.run()
}

#[cfg(test)]
mod cli_tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn verify_app() {
        Cli::command().debug_assert();
    }

    #[test]
    fn string_mode_is_the_default() {
        let cli = Cli::try_parse_from(["clipcast", "hello"]).unwrap();
        assert!(!cli.file_name && !cli.contents);
        assert_eq!(cli.value, OsString::from("hello"));
    }

    #[test]
    fn modes_conflict() {
        assert!(Cli::try_parse_from(["clipcast", "-f", "-c", "x"]).is_err());
    }

    #[test]
    fn an_operand_is_required() {
        assert!(Cli::try_parse_from(["clipcast"]).is_err());
        assert!(Cli::try_parse_from(["clipcast", "-f"]).is_err());
    }

    #[test]
    fn unknown_flags_are_rejected() {
        assert!(Cli::try_parse_from(["clipcast", "-x", "value"]).is_err());
    }

    #[test]
    fn double_dash_guards_a_leading_hyphen() {
        let cli = Cli::try_parse_from(["clipcast", "--", "-not-a-flag"]).unwrap();
        assert_eq!(cli.value, OsString::from("-not-a-flag"));

        let cli = Cli::try_parse_from(["clipcast", "-f", "--", "-f"]).unwrap();
        assert!(cli.file_name);
        assert_eq!(cli.value, OsString::from("-f"));
    }
}
