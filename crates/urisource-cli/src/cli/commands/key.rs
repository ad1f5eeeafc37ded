use urisource_core::ResourceKey;

use super::super::args::KeyArgs;
use crate::exit_codes;

pub fn run(args: KeyArgs) -> anyhow::Result<i32> {
    for uri in &args.uris {
        println!("{} {}", ResourceKey::from_uri(uri), uri);
    }
    Ok(exit_codes::SUCCESS)
}
