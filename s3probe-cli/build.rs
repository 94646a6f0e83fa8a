use vergen::EmitBuilder;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Emit the build timestamp and target triple for the long version string.  Git metadata isn't
    // available when the crate is built from crates.io, so it isn't used at all.
    EmitBuilder::builder()
        .build_timestamp()
        .cargo_target_triple()
        .cargo_debug()
        .emit()?;

    Ok(())
}
