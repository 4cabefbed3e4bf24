use crate::cmd::VersionArgs;
use crate::exit::{CliResult, SUCCESS};

pub fn run(args: VersionArgs) -> CliResult<i32> {
    if !args.extended {
        println!("esifrpc {}", env!("CARGO_PKG_VERSION"));
        return Ok(SUCCESS);
    }

    println!("name: esifrpc");
    println!("version: {}", env!("CARGO_PKG_VERSION"));
    println!(
        "target: {}",
        option_env!("ESIFRPC_BUILD_TARGET").unwrap_or("unknown")
    );
    println!("protocol: {}", esifrpc_peer::PROTOCOL_VERSION);
    println!("wire_mode: {}", esifrpc_codec::WIRE_MODE);
    println!(
        "features: uniform64={}, network-order={}, async={}, cli=true",
        cfg!(feature = "uniform64"),
        cfg!(feature = "network-order"),
        cfg!(feature = "async")
    );

    Ok(SUCCESS)
}
