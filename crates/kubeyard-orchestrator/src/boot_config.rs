//! Boot configuration (cloud-config) rendering for master and node VMs.
//!
//! Templates are plain text files with `{{ … }}` placeholders. Rendering is
//! literal substitution; unknown placeholders are left untouched.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;

use kubeyard_cloud::CertificateBundle;
use kubeyard_state::RegistryCredentials;

const API_SERVER_CRT: &str = "{{ k8s_master.apiserver.crt }}";
const API_SERVER_KEY: &str = "{{ k8s_master.apiserver.key }}";
const CA_CRT: &str = "{{ k8s_master.ca.crt }}";
const SSH_PUB_KEY: &str = "{{ k8s_master.ms.ssh.pub.key }}";
const CLUSTER_TOKEN: &str = "{{ k8s_master.cluster.token }}";
const CLUSTER_IP: &str = "{{ k8s_master.cluster.ip }}";
const MASTER_IP: &str = "{{ k8s_master.default_ip }}";

const DOCKER_URL: &str = "{{docker.url}}";
const DOCKER_SECRET: &str = "{{docker.secret}}";
const DOCKER_EMAIL: &str = "{{docker.email}}";

const WRITE_FILES: &str = "write-files:";

/// Registry auth file written on every node when credentials are set.
const DOCKER_CONFIG_BLOCK: &str = "write-files:
  - path: /.docker/config.json
    owner: core:core
    permissions: '0644'
    content: |
      {
        \"auths\": {
          {{docker.url}}: {
            \"auth\": {{docker.secret}},
            \"email\": {{docker.email}}
          }
         }
      }";

/// Subject names on the API server certificate besides the master hostname.
pub const API_SERVER_NAMES: [&str; 5] = [
    "kubernetes",
    "kubernetes.default",
    "kubernetes.default.svc",
    "kubernetes.default.svc.cluster",
    "kubernetes.default.svc.cluster.local",
];

/// Certificate validity for the API server bundle.
pub const CERT_VALIDITY_DAYS: u32 = 3650;

pub fn master_hostname(cluster_name: &str) -> String {
    format!("{cluster_name}-k8s-master")
}

pub fn node_hostname(cluster_name: &str, index: u32) -> String {
    format!("{cluster_name}-k8s-node-{index}")
}

/// Bootstrap token shared by master and nodes, derived from the cluster id.
///
/// The id with hyphens removed is cut to 22 characters and split `6.16`.
pub fn join_token(cluster_id: &str) -> String {
    let compact: String = cluster_id.chars().filter(|c| *c != '-').take(22).collect();
    let split = compact
        .char_indices()
        .nth(6)
        .map(|(i, _)| i)
        .unwrap_or(compact.len());
    let (head, tail) = compact.split_at(split);
    format!("{head}.{tail}")
}

/// Indent PEM continuation lines so they stay inside a YAML block scalar.
fn indent_pem(pem: &str) -> String {
    pem.replace('\n', "\n      ")
}

/// Inputs of the master template.
pub struct MasterBootParams<'a> {
    pub certificates: &'a CertificateBundle,
    pub token: &'a str,
    /// Management key first, then the owner's key pair if any.
    pub authorized_keys: &'a [String],
    pub public_ip: &'a str,
}

pub fn render_master(template: &str, params: &MasterBootParams<'_>) -> String {
    let ca_chain = params.certificates.ca_chain.join("\n");
    let keys = params
        .authorized_keys
        .iter()
        .map(|key| format!("- \"{key}\""))
        .collect::<Vec<_>>()
        .join("\n  ");

    template
        .replace(API_SERVER_CRT, &indent_pem(&params.certificates.certificate))
        .replace(API_SERVER_KEY, &indent_pem(&params.certificates.private_key))
        .replace(CA_CRT, &indent_pem(&ca_chain))
        .replace(SSH_PUB_KEY, &keys)
        .replace(CLUSTER_TOKEN, params.token)
        .replace(
            CLUSTER_IP,
            &format!("--apiserver-cert-extra-sans={}", params.public_ip),
        )
}

pub fn render_node(
    template: &str,
    master_ip: &str,
    token: &str,
    registry: Option<&RegistryCredentials>,
) -> String {
    let rendered = template
        .replace(MASTER_IP, master_ip)
        .replace(CLUSTER_TOKEN, token);

    let Some(registry) = registry else {
        return rendered;
    };
    let secret = STANDARD.encode(format!("{}:{}", registry.username, registry.password));
    rendered
        .replace(WRITE_FILES, DOCKER_CONFIG_BLOCK)
        .replace(DOCKER_URL, &format!("\"{}\"", registry.url))
        .replace(DOCKER_SECRET, &format!("\"{secret}\""))
        .replace(DOCKER_EMAIL, &format!("\"{}\"", registry.email))
}

/// User data travels base64 encoded.
pub fn encode_user_data(rendered: &str) -> String {
    STANDARD.encode(rendered)
}
