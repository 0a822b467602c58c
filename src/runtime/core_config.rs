use serde_yaml::{Mapping, Value};
use std::path::Path;

use super::document::ConfigDocument;
use crate::error::Result;
use crate::node::Endpoints;

/// Sections that must exist in a peer `core.yaml` before it is patched.
pub const REQUIRED_SECTIONS: [&str; 6] = [
    "peer",
    "peer.gossip",
    "metrics",
    "operations",
    "vm",
    "chaincode",
];

/// An external chaincode builder and the environment variables passed through to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExternalBuilder {
    pub name: &'static str,
    pub directory: &'static str,
    pub propagate_environment: &'static [&'static str],
}

pub const EXTERNAL_BUILDERS: [ExternalBuilder; 4] = [
    ExternalBuilder {
        name: "golang",
        directory: "golang",
        propagate_environment: &["GOCACHE", "GOENV", "GOROOT", "HOME"],
    },
    ExternalBuilder {
        name: "java",
        directory: "java",
        propagate_environment: &["HOME", "JAVA_HOME", "MAVEN_OPTS"],
    },
    ExternalBuilder {
        name: "node",
        directory: "node",
        propagate_environment: &["HOME", "npm_config_cache"],
    },
    ExternalBuilder {
        name: "external-service-builder",
        directory: "external",
        propagate_environment: &["HOME"],
    },
];

/// Per-node values written into the peer configuration.
#[derive(Debug, Clone)]
pub struct PeerOverrides<'a> {
    pub peer_id: String,
    pub msp_id: &'a str,
    pub msp_dir: &'a Path,
    pub data_dir: &'a Path,
    pub endpoints: &'a Endpoints,
}

fn listen_address(port: u16) -> String {
    format!("0.0.0.0:{}", port)
}

/// Patch a `core.yaml` document in place for a single, self-led peer.
///
/// All required sections are checked before anything is changed.
pub fn apply_peer_overrides(
    document: &mut ConfigDocument,
    overrides: &PeerOverrides<'_>,
    builders_dir: &Path,
) -> Result<()> {
    for section in REQUIRED_SECTIONS {
        document.section(section)?;
    }

    let api_address = overrides.endpoints.api.address();

    document
        .section_mut("peer")?
        .set("id", overrides.peer_id.as_str())
        .set("mspConfigPath", path_value(overrides.msp_dir))
        .set("localMspId", overrides.msp_id)
        .set("fileSystemPath", path_value(overrides.data_dir))
        .set("address", listen_address(overrides.endpoints.api.port))
        .set("listenAddress", listen_address(overrides.endpoints.api.port))
        .set(
            "chaincodeListenAddress",
            listen_address(overrides.endpoints.chaincode.port),
        );

    document
        .section_mut("peer.gossip")?
        .set("bootstrap", api_address.as_str())
        .set("useLeaderElection", false)
        .set("orgLeader", true)
        .set("endpoint", api_address.as_str())
        .set("externalEndpoint", api_address.as_str());

    document.section_mut("metrics")?.set("provider", "prometheus");

    document
        .section_mut("operations")?
        .set("listenAddress", listen_address(overrides.endpoints.operations.port));

    document.section_mut("vm")?.set("endpoint", "");

    document
        .section_mut("chaincode")?
        .set("externalBuilders", external_builders(builders_dir));

    Ok(())
}

fn path_value(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn external_builders(builders_dir: &Path) -> Value {
    let builders = EXTERNAL_BUILDERS
        .iter()
        .map(|builder| {
            let mut entry = Mapping::new();
            entry.insert(
                Value::from("path"),
                Value::from(path_value(&builders_dir.join(builder.directory))),
            );
            entry.insert(Value::from("name"), Value::from(builder.name));
            entry.insert(
                Value::from("propagateEnvironment"),
                Value::from(builder.propagate_environment.to_vec()),
            );
            Value::Mapping(entry)
        })
        .collect();
    Value::Sequence(builders)
}
