pub mod appointment_service;

pub use appointment_service::AppointmentGrpcService;

// Include generated proto code
pub mod proto {
    tonic::include_proto!("proptech.appointment.v1");

    pub const FILE_DESCRIPTOR_SET: &[u8] =
        tonic::include_file_descriptor_set!("appointment_descriptor");
}
