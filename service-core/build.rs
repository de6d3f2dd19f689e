use std::path::PathBuf;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let proto_root = PathBuf::from("../proto");

    // Tell cargo to recompile if any proto files change
    println!("cargo:rerun-if-changed=../proto/proptech/user/v1/");
    println!("cargo:rerun-if-changed=../proto/proptech/property/v1/");
    println!("cargo:rerun-if-changed=../proto/proptech/appointment/v1/");

    // User and property services are external collaborators. Server stubs are
    // generated as well so tests can stand up doubles of them.
    tonic_build::configure()
        .build_server(true)
        .build_client(true)
        .compile_protos(
            &[
                "../proto/proptech/user/v1/user.proto",
                "../proto/proptech/property/v1/property.proto",
            ],
            &[&proto_root],
        )?;

    // Appointment service protos (client-side, the server lives in appointment-service)
    tonic_build::configure()
        .build_server(false)
        .build_client(true)
        .compile_protos(
            &["../proto/proptech/appointment/v1/appointment.proto"],
            &[&proto_root],
        )?;

    Ok(())
}
