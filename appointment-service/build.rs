fn main() -> Result<(), Box<dyn std::error::Error>> {
    let out_dir = std::path::PathBuf::from(std::env::var("OUT_DIR")?);

    // Compile appointment service protos with file descriptor set for reflection
    tonic_build::configure()
        .build_server(true)
        .build_client(false)
        .file_descriptor_set_path(out_dir.join("appointment_descriptor.bin"))
        .compile_protos(
            &["../proto/proptech/appointment/v1/appointment.proto"],
            &["../proto"],
        )?;

    println!("cargo:rerun-if-changed=../proto/proptech/appointment/v1/appointment.proto");

    Ok(())
}
