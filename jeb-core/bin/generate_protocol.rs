use std::env;
use std::fs;
use std::path::PathBuf;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("Generating kRPC protocol types...");

    let manifest_dir = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    let out_dir = manifest_dir.join("src/proto/generated");

    let proto_file = manifest_dir.join("proto/krpc.proto");
    let proto_folder = manifest_dir.join("proto");

    if !out_dir.exists() {
        fs::create_dir_all(&out_dir)?;
    }

    tonic_prost_build::configure()
        .build_server(false)
        .build_client(false)
        .out_dir(&out_dir)
        .compile_protos(&[proto_file], &[proto_folder])?;

    // prost-build names the output after the proto package.
    fs::rename(
        out_dir.join("krpc.schema.rs"),
        out_dir.join("krpc.rs"),
    )?;

    println!("Done! Generated files are in src/proto/generated");

    Ok(())
}
