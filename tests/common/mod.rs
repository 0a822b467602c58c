#![allow(dead_code)]

use prost::Message;
use std::convert::Infallible;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::codec::ProstCodec;
use tonic::codegen::{empty_body, http, Body, BoxFuture, Context, Poll, Service, StdError};

use fabnode::network::protos::{
    ChannelInfo, ChannelQueryResponse, Header, Proposal, ProposalResponse, Response,
    SerializedIdentity, SignatureHeader, SignedProposal,
};

/// Serve `200 OK` to every request on `port`, starting after `delay`.
pub fn serve_health_after(port: u16, delay: Duration) {
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        let listener = TcpListener::bind(("127.0.0.1", port)).await.unwrap();
        loop {
            let (mut socket, _) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(_) => return,
            };
            tokio::spawn(async move {
                let mut buf = [0u8; 1024];
                let _ = socket.read(&mut buf).await;
                let _ = socket
                    .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 0\r\nconnection: close\r\n\r\n")
                    .await;
            });
        }
    });
}

pub fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

/// A node's endorser service that answers every proposal with a fixed response and records the
/// MSP ID of each proposal's creator.
#[derive(Clone)]
pub struct EndorserStub {
    status: i32,
    message: String,
    channels: Vec<String>,
    creators: Arc<Mutex<Vec<String>>>,
}

impl EndorserStub {
    /// Accept every proposal and report `channels` as joined.
    pub fn accepting(channels: &[&str]) -> Self {
        Self {
            status: 200,
            message: String::new(),
            channels: channels.iter().map(|c| c.to_string()).collect(),
            creators: Arc::default(),
        }
    }

    /// Answer every proposal with an error status.
    pub fn rejecting(status: i32, message: &str) -> Self {
        Self {
            status,
            message: message.to_string(),
            channels: Vec::new(),
            creators: Arc::default(),
        }
    }

    /// MSP IDs of the creators of the proposals received so far.
    pub fn creators(&self) -> Vec<String> {
        self.creators.lock().unwrap().clone()
    }

    /// Serve on an ephemeral local port and return it.
    pub async fn serve(self) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            tonic::transport::Server::builder()
                .add_service(self)
                .serve_with_incoming(TcpListenerStream::new(listener))
                .await
                .unwrap();
        });
        port
    }

    fn respond(&self, proposal: &SignedProposal) -> ProposalResponse {
        let creator = Proposal::decode(proposal.proposal_bytes.as_slice())
            .and_then(|p| Header::decode(p.header.as_slice()))
            .and_then(|h| SignatureHeader::decode(h.signature_header.as_slice()))
            .and_then(|s| SerializedIdentity::decode(s.creator.as_slice()))
            .map(|identity| identity.mspid)
            .unwrap_or_default();
        self.creators.lock().unwrap().push(creator);

        let payload = ChannelQueryResponse {
            channels: self
                .channels
                .iter()
                .map(|channel_id| ChannelInfo {
                    channel_id: channel_id.clone(),
                })
                .collect(),
        };
        ProposalResponse {
            response: Some(Response {
                status: self.status,
                message: self.message.clone(),
                payload: payload.encode_to_vec(),
            }),
            ..Default::default()
        }
    }
}

struct ProcessProposal(EndorserStub);

impl tonic::server::UnaryService<SignedProposal> for ProcessProposal {
    type Response = ProposalResponse;
    type Future = std::future::Ready<Result<tonic::Response<ProposalResponse>, tonic::Status>>;

    fn call(&mut self, request: tonic::Request<SignedProposal>) -> Self::Future {
        let response = self.0.respond(request.get_ref());
        std::future::ready(Ok(tonic::Response::new(response)))
    }
}

impl<B> Service<http::Request<B>> for EndorserStub
where
    B: Body + Send + 'static,
    B::Error: Into<StdError> + Send + 'static,
{
    type Response = http::Response<tonic::body::BoxBody>;
    type Error = Infallible;
    type Future = BoxFuture<Self::Response, Self::Error>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: http::Request<B>) -> Self::Future {
        let stub = self.clone();
        Box::pin(async move {
            if request.uri().path() != "/protos.Endorser/ProcessProposal" {
                let mut response = http::Response::new(empty_body());
                let headers = response.headers_mut();
                headers.insert(
                    "grpc-status",
                    http::HeaderValue::from(tonic::Code::Unimplemented as i32),
                );
                headers.insert(
                    http::header::CONTENT_TYPE,
                    http::HeaderValue::from_static("application/grpc"),
                );
                return Ok(response);
            }

            let codec = ProstCodec::<ProposalResponse, SignedProposal>::default();
            let mut grpc = tonic::server::Grpc::new(codec);
            Ok(grpc.unary(ProcessProposal(stub), request).await)
        })
    }
}

impl tonic::server::NamedService for EndorserStub {
    const NAME: &'static str = "protos.Endorser";
}
