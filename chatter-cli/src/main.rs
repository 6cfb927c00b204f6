use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tonic::transport::Channel as Transport;
use tracing::{debug, info};

use chatter_api::proto::community_service_client::CommunityServiceClient;
use chatter_api::proto::message_service_client::MessageServiceClient;
use chatter_api::proto::user_service_client::UserServiceClient;
use chatter_api::proto::{self, *};
use chatter_api::CredentialCarrier;
use chatter_core::logging::{init_logging_with_config, LogConfig, LogLevel};
use chatter_core::Credentials;

#[derive(Parser, Debug)]
#[command(name = "chatter")]
#[command(author, version, about = "Command-line client for the chatter API", long_about = None)]
struct Args {
    /// Server endpoint
    #[arg(short, long, default_value = "http://127.0.0.1:50051", env = "CHATTER_SERVER")]
    server: String,

    /// Username to authenticate as
    #[arg(long, env = "CHATTER_UNAME")]
    uname: Option<String>,

    /// Token for --uname
    #[arg(long, env = "CHATTER_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Set the log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "warn")]
    log_level: String,

    /// Enable JSON formatted logging
    #[arg(long)]
    json_logs: bool,

    /// Print results as JSON lines
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Provision a user with a random name and token
    GenerateUser,

    /// Create a user with the given credentials
    CreateUser {
        uname: String,
        password: String,
        #[arg(long)]
        admin: bool,
    },

    CreateCommunity {
        name: String,
        #[arg(long)]
        admin_id: i64,
        #[arg(long)]
        private: bool,
    },

    CreateChannel {
        community_id: i64,
        name: String,
        #[arg(long)]
        admin_id: i64,
        /// Accept messages without an author
        #[arg(long)]
        anonymous: bool,
    },

    /// List all communities
    Communities,

    /// List the channels of a community
    Channels { community_id: i64 },

    /// Send messages, one per argument or one per stdin line
    Send {
        channel_id: i64,
        /// Author id; omit to post anonymously
        #[arg(long)]
        user_id: Option<i64>,
        #[arg(long)]
        thread: Option<i64>,
        texts: Vec<String>,
    },

    /// Print a channel's stored messages
    History {
        channel_id: i64,
        #[arg(long)]
        after: Option<i64>,
        #[arg(long)]
        limit: Option<u32>,
    },

    /// Follow a channel's new messages until interrupted
    Listen { channel_id: i64 },

    /// Ban a user (admin only)
    Ban {
        uname: String,
        #[arg(long, default_value_t = 1)]
        days: u32,
    },
}

#[derive(Serialize)]
struct MessageView<'a> {
    id: i64,
    channel_id: i64,
    user_id: Option<i64>,
    uname: &'a str,
    thread_id: Option<i64>,
    text: &'a str,
    date: i64,
}

impl<'a> From<&'a proto::Message> for MessageView<'a> {
    fn from(m: &'a proto::Message) -> Self {
        Self {
            id: m.msg_id,
            channel_id: m.channel_id,
            user_id: (m.user_id != 0).then_some(m.user_id),
            uname: &m.uname,
            thread_id: (m.thread_id != 0).then_some(m.thread_id),
            text: &m.text,
            date: m.date,
        }
    }
}

struct Output {
    json: bool,
}

impl Output {
    fn message(&self, m: &proto::Message) -> Result<()> {
        if self.json {
            println!("{}", serde_json::to_string(&MessageView::from(m))?);
        } else {
            let author = if m.uname.is_empty() { "(anonymous)" } else { &m.uname };
            println!("[{}] {}: {}", m.msg_id, author, m.text);
        }
        Ok(())
    }

    fn community(&self, c: &proto::Community) -> Result<()> {
        if self.json {
            let value = serde_json::json!({
                "id": c.community_id,
                "name": c.name,
                "admin_id": c.admin_id,
                "public": c.public,
            });
            println!("{}", value);
        } else {
            println!("{}\t{}{}", c.community_id, c.name, if c.public { "" } else { " (private)" });
        }
        Ok(())
    }

    fn channel(&self, c: &proto::Channel) -> Result<()> {
        if self.json {
            let value = serde_json::json!({
                "id": c.channel_id,
                "name": c.name,
                "community_id": c.community_id,
                "admin_id": c.admin_id,
                "anonymous": c.anonymous,
            });
            println!("{}", value);
        } else {
            println!("{}\t#{}{}", c.channel_id, c.name, if c.anonymous { " (anonymous)" } else { "" });
        }
        Ok(())
    }
}

async fn read_stdin_lines() -> Result<Vec<String>> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut texts = Vec::new();
    while let Some(line) = lines.next_line().await? {
        if !line.is_empty() {
            texts.push(line);
        }
    }
    Ok(texts)
}

async fn run(args: Args) -> Result<()> {
    let credentials = Credentials::from_parts(args.uname.as_deref(), args.token.as_deref());
    let carrier = CredentialCarrier::new(credentials.as_ref()).context("credentials are not valid metadata")?;
    let out = Output { json: args.json };

    let transport = Transport::from_shared(args.server.clone())?
        .connect()
        .await
        .with_context(|| format!("connecting to {}", args.server))?;
    debug!(server = %args.server, "Connected");

    let mut users = UserServiceClient::with_interceptor(transport.clone(), carrier.clone());
    let mut communities = CommunityServiceClient::with_interceptor(transport.clone(), carrier.clone());
    let mut messages = MessageServiceClient::with_interceptor(transport, carrier);

    match args.command {
        Command::GenerateUser => {
            let user = users.generate_user(GenerateUserRequest {}).await?.into_inner();
            if out.json {
                let value = serde_json::json!({ "id": user.user_id, "uname": user.uname, "token": user.token });
                println!("{}", value);
            } else {
                println!("id:    {}\nuname: {}\ntoken: {}", user.user_id, user.uname, user.token);
            }
        }
        Command::CreateUser { uname, password, admin } => {
            let created = users
                .create_user(CreateUserRequest { uname, password, admin })
                .await?
                .into_inner();
            println!("{}", created.user_id);
        }
        Command::CreateCommunity { name, admin_id, private } => {
            let community = communities
                .create_community(CreateCommunityRequest {
                    name,
                    admin_id,
                    public: !private,
                })
                .await?
                .into_inner();
            out.community(&community)?;
        }
        Command::CreateChannel {
            community_id,
            name,
            admin_id,
            anonymous,
        } => {
            let channel = communities
                .create_channel(CreateChannelRequest {
                    name,
                    community_id,
                    admin_id,
                    anonymous,
                })
                .await?
                .into_inner();
            out.channel(&channel)?;
        }
        Command::Communities => {
            let mut stream = communities.list_communities(ListCommunitiesRequest {}).await?.into_inner();
            while let Some(community) = stream.message().await? {
                out.community(&community)?;
            }
        }
        Command::Channels { community_id } => {
            let mut stream = communities
                .list_channels(ListChannelsRequest { community_id })
                .await?
                .into_inner();
            while let Some(channel) = stream.message().await? {
                out.channel(&channel)?;
            }
        }
        Command::Send {
            channel_id,
            user_id,
            thread,
            texts,
        } => {
            let texts = if texts.is_empty() { read_stdin_lines().await? } else { texts };
            let count = texts.len();
            let uname = args.uname.unwrap_or_default();
            let batch: Vec<proto::Message> = texts
                .into_iter()
                .map(|text| proto::Message {
                    channel_id,
                    user_id: user_id.unwrap_or(0),
                    uname: uname.clone(),
                    thread_id: thread.unwrap_or(0),
                    thread_child: thread.is_some(),
                    text,
                    ..Default::default()
                })
                .collect();

            messages.send_messages(tokio_stream::iter(batch)).await?;
            info!(count, channel_id, "Messages sent");
        }
        Command::History {
            channel_id,
            after,
            limit,
        } => {
            let mut stream = messages
                .list_messages(ListMessagesRequest {
                    channel_id,
                    after_id: after.unwrap_or(0),
                    limit: limit.unwrap_or(0),
                })
                .await?
                .into_inner();
            while let Some(message) = stream.message().await? {
                out.message(&message)?;
            }
        }
        Command::Listen { channel_id } => {
            let mut stream = messages
                .subscribe_messages(SubscribeMessagesRequest { channel_id })
                .await?
                .into_inner();
            loop {
                tokio::select! {
                    next = stream.message() => match next? {
                        Some(message) => out.message(&message)?,
                        None => break,
                    },
                    _ = tokio::signal::ctrl_c() => break,
                }
            }
        }
        Command::Ban { uname, days } => {
            users.ban_user(BanUserRequest { uname: uname.clone(), days }).await?;
            println!("Banned {} for {} day(s)", uname, days);
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = LogLevel::from_str(&args.log_level).unwrap_or_else(|| {
        eprintln!("Invalid log level '{}', using 'warn'", args.log_level);
        LogLevel::Warn
    });
    init_logging_with_config(LogConfig::new(log_level).json_format(args.json_logs))?;

    run(args).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_send() {
        let args = Args::try_parse_from([
            "chatter", "--uname", "admin1", "--token", "t", "send", "5", "--user-id", "1", "a", "b",
        ])
        .unwrap();

        assert_eq!(args.uname.as_deref(), Some("admin1"));
        match args.command {
            Command::Send {
                channel_id,
                user_id,
                texts,
                ..
            } => {
                assert_eq!(channel_id, 5);
                assert_eq!(user_id, Some(1));
                assert_eq!(texts, vec!["a", "b"]);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_parse_ban_defaults() {
        let args = Args::try_parse_from(["chatter", "ban", "victim"]).unwrap();
        assert!(matches!(args.command, Command::Ban { ref uname, days: 1 } if uname == "victim"));
        assert!(Args::try_parse_from(["chatter", "ban"]).is_err());
    }

    #[test]
    fn test_message_view_drops_zero_ids() {
        let m = proto::Message {
            msg_id: 3,
            channel_id: 1,
            text: "hi".to_string(),
            ..Default::default()
        };
        let json = serde_json::to_value(MessageView::from(&m)).unwrap();
        assert_eq!(json["user_id"], serde_json::Value::Null);
        assert_eq!(json["text"], "hi");
    }
}
