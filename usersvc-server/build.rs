//! Generates the `usersvc.v1.UserService` gRPC server and client.
//!
//! Messages are hand-written prost structs in `src/rpc/proto.rs`, so the
//! service is described here instead of in a `.proto` file and no `protoc`
//! is needed at build time.

fn main() {
    let method = |name: &str, route: &str, input: &str, output: &str| {
        tonic_build::manual::Method::builder()
            .name(name)
            .route_name(route)
            .input_type(format!("crate::rpc::proto::{input}"))
            .output_type(format!("crate::rpc::proto::{output}"))
            .codec_path("tonic::codec::ProstCodec")
            .build()
    };

    let service = tonic_build::manual::Service::builder()
        .name("UserService")
        .package("usersvc.v1")
        .method(method(
            "create_user",
            "CreateUser",
            "CreateUserRequest",
            "CreateUserResponse",
        ))
        .method(method("get_user", "GetUser", "GetUserRequest", "GetUserResponse"))
        .build();

    tonic_build::manual::Builder::new()
        .build_server(true)
        .build_client(true)
        .compile(&[service]);

    println!("cargo:rerun-if-changed=build.rs");
}
