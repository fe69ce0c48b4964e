//! Build script to compile the CSI Protocol Buffer definitions.

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Use the vendored protoc and its well-known type includes so the build
    // does not depend on a system protobuf install.
    std::env::set_var("PROTOC", protoc_bin_vendored::protoc_bin_path()?);
    let well_known = protoc_bin_vendored::include_path()?;

    tonic_build::configure()
        .build_server(true)
        .build_client(true)
        .compile_protos(
            &["proto/csi/v1/csi.proto"],
            &[std::path::PathBuf::from("proto"), well_known],
        )?;

    println!("cargo:rerun-if-changed=proto/");
    Ok(())
}
