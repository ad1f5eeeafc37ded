use super::args::*;

pub mod fetch;
pub mod key;

pub async fn dispatch(cli: Cli) -> anyhow::Result<i32> {
    match cli.cmd {
        Command::Fetch(args) => fetch::run(args).await,
        Command::Key(args) => key::run(args),
    }
}
