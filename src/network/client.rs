use prost::Message;
use ring::digest;
use ring::rand::{SecureRandom, SystemRandom};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tonic::codec::ProstCodec;
use tonic::transport::Channel;
use tracing::debug;

use super::protos::{
    ChaincodeHeaderExtension, ChaincodeId, ChaincodeInput, ChaincodeInvocationSpec,
    ChaincodeProposalPayload, ChaincodeSpec, ChannelHeader, ChannelQueryResponse, Header,
    Proposal, ProposalResponse, SerializedIdentity, SignatureHeader, SignedProposal,
    CHAINCODE_TYPE_GOLANG, HEADER_TYPE_ENDORSER_TRANSACTION,
};
use super::ProbeError;
use crate::pki::Identity;

const PROCESS_PROPOSAL: &str = "/protos.Endorser/ProcessProposal";
const CONFIGURATION_CHAINCODE: &str = "cscc";
const GET_CHANNELS: &[u8] = b"GetChannels";
const NONCE_LENGTH: usize = 24;
const STATUS_OK: i32 = 200;

/// Client for the node's endorser service, authenticated as one identity of an MSP.
pub struct ChannelQueryClient {
    msp_id: String,
    identity: Arc<Identity>,
    timeout: Duration,
}

impl ChannelQueryClient {
    pub fn new(msp_id: impl Into<String>, identity: Arc<Identity>, timeout: Duration) -> Self {
        Self {
            msp_id: msp_id.into(),
            identity,
            timeout,
        }
    }

    /// Connect to a node's API endpoint (`host:port`)
    pub async fn connect(&self, address: &str) -> Result<tonic::client::Grpc<Channel>, ProbeError> {
        debug!("Connecting to {}", address);

        let channel = Channel::from_shared(format!("http://{}", address))
            .map_err(|e| ProbeError::Connect(e.to_string()))?
            .connect_timeout(self.timeout)
            .timeout(self.timeout)
            .connect()
            .await
            .map_err(|e| ProbeError::Connect(e.to_string()))?;

        Ok(tonic::client::Grpc::new(channel))
    }

    /// List the channels the node has joined.
    ///
    /// Fails with `ProbeError::Rejected` if the node does not accept the identity.
    pub async fn list_channels(&self, address: &str) -> Result<Vec<String>, ProbeError> {
        let mut grpc = self.connect(address).await?;
        grpc.ready()
            .await
            .map_err(|e| ProbeError::Connect(format!("service was not ready: {}", e)))?;

        let request = self.channel_query_proposal()?;
        let path = http::uri::PathAndQuery::from_static(PROCESS_PROPOSAL);
        let codec: ProstCodec<SignedProposal, ProposalResponse> = ProstCodec::default();
        let response = grpc
            .unary(tonic::Request::new(request), path, codec)
            .await?
            .into_inner();

        let response = response
            .response
            .ok_or_else(|| ProbeError::Rejected {
                status: 0,
                message: "empty proposal response".to_string(),
            })?;
        if response.status != STATUS_OK {
            return Err(ProbeError::Rejected {
                status: response.status,
                message: response.message,
            });
        }

        let channels = ChannelQueryResponse::decode(response.payload.as_slice())?;
        Ok(channels.channels.into_iter().map(|c| c.channel_id).collect())
    }

    /// Build a proposal invoking `cscc GetChannels`, signed by this client's identity.
    pub fn channel_query_proposal(&self) -> Result<SignedProposal, ProbeError> {
        let creator = SerializedIdentity {
            mspid: self.msp_id.clone(),
            id_bytes: self.identity.certificate().bytes().to_vec(),
        }
        .encode_to_vec();

        let mut nonce = [0u8; NONCE_LENGTH];
        SystemRandom::new()
            .fill(&mut nonce)
            .map_err(|_| ProbeError::Signing("failed to generate nonce".to_string()))?;

        let chaincode_id = ChaincodeId {
            name: CONFIGURATION_CHAINCODE.to_string(),
            ..Default::default()
        };

        let channel_header = ChannelHeader {
            r#type: HEADER_TYPE_ENDORSER_TRANSACTION,
            timestamp: Some(now()),
            tx_id: transaction_id(&nonce, &creator),
            extension: ChaincodeHeaderExtension {
                chaincode_id: Some(chaincode_id.clone()),
            }
            .encode_to_vec(),
            ..Default::default()
        };

        let header = Header {
            channel_header: channel_header.encode_to_vec(),
            signature_header: SignatureHeader {
                creator,
                nonce: nonce.to_vec(),
            }
            .encode_to_vec(),
        };

        let invocation = ChaincodeInvocationSpec {
            chaincode_spec: Some(ChaincodeSpec {
                r#type: CHAINCODE_TYPE_GOLANG,
                chaincode_id: Some(chaincode_id),
                input: Some(ChaincodeInput {
                    args: vec![GET_CHANNELS.to_vec()],
                    is_init: false,
                }),
                timeout: 0,
            }),
        };

        let proposal = Proposal {
            header: header.encode_to_vec(),
            payload: ChaincodeProposalPayload {
                input: invocation.encode_to_vec(),
            }
            .encode_to_vec(),
            extension: Vec::new(),
        }
        .encode_to_vec();

        let signature = self
            .identity
            .private_key()
            .sign(&proposal)
            .map_err(|e| ProbeError::Signing(e.to_string()))?;

        Ok(SignedProposal {
            proposal_bytes: proposal,
            signature,
        })
    }
}

/// Transaction ID: hex SHA-256 of nonce followed by creator.
fn transaction_id(nonce: &[u8], creator: &[u8]) -> String {
    let mut context = digest::Context::new(&digest::SHA256);
    context.update(nonce);
    context.update(creator);
    hex::encode(context.finish().as_ref())
}

fn now() -> prost_types::Timestamp {
    let elapsed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    prost_types::Timestamp {
        seconds: elapsed.as_secs() as i64,
        nanos: elapsed.subsec_nanos() as i32,
    }
}
