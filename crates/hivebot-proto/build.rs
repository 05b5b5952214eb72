//! Build script for hivebot-proto
//!
//! Compiles the protobuf definitions using tonic-build.

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tonic_prost_build::configure()
        .build_server(true)
        .build_client(true)
        .compile_protos(&["../../proto/hivebot/v1/subbot.proto"], &["../../proto"])?;

    Ok(())
}
