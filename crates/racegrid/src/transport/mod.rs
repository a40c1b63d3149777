pub mod grpc;
pub mod server;

mod convert;

/// Generated protobuf/gRPC code.
pub mod proto {
    tonic::include_proto!("racegrid");
}
