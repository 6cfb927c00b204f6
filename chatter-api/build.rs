//! Generates the gRPC client and server stubs for the chatter services.
//!
//! Message types are plain prost structs in `src/proto.rs`; only the
//! service plumbing is generated, so no `protoc` is needed at build time.

use tonic_build::manual::{Builder, Method, Service};

const PACKAGE: &str = "chatter.v1";
const CODEC: &str = "tonic::codec::ProstCodec";

struct Rpc {
    name: &'static str,
    route: &'static str,
    input: &'static str,
    output: &'static str,
    client_streaming: bool,
    server_streaming: bool,
}

const fn unary(name: &'static str, route: &'static str, input: &'static str, output: &'static str) -> Rpc {
    Rpc {
        name,
        route,
        input,
        output,
        client_streaming: false,
        server_streaming: false,
    }
}

const fn server_stream(name: &'static str, route: &'static str, input: &'static str, output: &'static str) -> Rpc {
    Rpc {
        server_streaming: true,
        ..unary(name, route, input, output)
    }
}

const fn client_stream(name: &'static str, route: &'static str, input: &'static str, output: &'static str) -> Rpc {
    Rpc {
        client_streaming: true,
        ..unary(name, route, input, output)
    }
}

fn service(name: &str, rpcs: &[Rpc]) -> Service {
    let mut builder = Service::builder().name(name).package(PACKAGE);
    for rpc in rpcs {
        let mut method = Method::builder()
            .name(rpc.name)
            .route_name(rpc.route)
            .input_type(format!("crate::proto::{}", rpc.input))
            .output_type(format!("crate::proto::{}", rpc.output))
            .codec_path(CODEC);
        if rpc.client_streaming {
            method = method.client_streaming();
        }
        if rpc.server_streaming {
            method = method.server_streaming();
        }
        builder = builder.method(method.build());
    }
    builder.build()
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("cargo:rerun-if-changed=build.rs");

    let user = service(
        "UserService",
        &[
            unary("create_user", "CreateUser", "CreateUserRequest", "CreateUserResponse"),
            unary("generate_user", "GenerateUser", "GenerateUserRequest", "User"),
            unary("ban_user", "BanUser", "BanUserRequest", "Empty"),
        ],
    );

    let community = service(
        "CommunityService",
        &[
            unary("create_community", "CreateCommunity", "CreateCommunityRequest", "Community"),
            unary("create_channel", "CreateChannel", "CreateChannelRequest", "Channel"),
            server_stream("list_communities", "ListCommunities", "ListCommunitiesRequest", "Community"),
            server_stream("list_channels", "ListChannels", "ListChannelsRequest", "Channel"),
        ],
    );

    let message = service(
        "MessageService",
        &[
            client_stream("send_messages", "SendMessages", "Message", "Empty"),
            unary("send_message", "SendMessage", "Message", "Message"),
            server_stream("list_messages", "ListMessages", "ListMessagesRequest", "Message"),
            server_stream("subscribe_messages", "SubscribeMessages", "SubscribeMessagesRequest", "Message"),
        ],
    );

    Builder::new()
        .build_server(true)
        .build_client(true)
        .compile(&[user, community, message]);

    Ok(())
}
