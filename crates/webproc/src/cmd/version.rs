use webproc_peer::{DEFAULT_PROTOCOL_NAME, MESSAGE_VERSION};

use crate::cmd::VersionArgs;
use crate::exit::{CliResult, SUCCESS};

pub fn run(args: VersionArgs) -> CliResult<i32> {
    if !args.extended {
        println!("webprocess {}", env!("CARGO_PKG_VERSION"));
        return Ok(SUCCESS);
    }

    println!("name: webprocess");
    println!("version: {}", env!("CARGO_PKG_VERSION"));
    println!("protocol: {DEFAULT_PROTOCOL_NAME}");
    println!("message_version: {MESSAGE_VERSION}");
    println!(
        "target: {}",
        option_env!("WEBPROC_BUILD_TARGET").unwrap_or("unknown")
    );
    println!("target_os: {}", std::env::consts::OS);
    println!("target_arch: {}", std::env::consts::ARCH);
    println!("features: async={}, cli=true", cfg!(feature = "async"));

    Ok(SUCCESS)
}
