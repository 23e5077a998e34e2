use axum::Router;
use axum::routing::get;
use hellojohn_consensus::PeerTls;
use hellojohn_consensus::server::serve;
use rcgen::{
    BasicConstraints, Certificate, CertificateParams, ExtendedKeyUsagePurpose, IsCa, KeyPair,
};
use tokio::net::TcpListener;

struct Authority {
    cert: Certificate,
    key: KeyPair,
}

fn authority() -> Authority {
    let mut params = CertificateParams::new(Vec::<String>::new()).expect("params");
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    let key = KeyPair::generate().expect("key");
    let cert = params.self_signed(&key).expect("ca cert");
    Authority { cert, key }
}

fn node_material(ca: &Authority, trusted: &Authority) -> PeerTls {
    let mut params = CertificateParams::new(vec!["hellojohn-node".to_string()]).expect("params");
    params.extended_key_usages = vec![
        ExtendedKeyUsagePurpose::ServerAuth,
        ExtendedKeyUsagePurpose::ClientAuth,
    ];
    let key = KeyPair::generate().expect("key");
    let cert = params.signed_by(&key, &ca.cert, &ca.key).expect("node cert");
    PeerTls::from_pem(
        cert.pem().into_bytes(),
        key.serialize_pem().into_bytes(),
        trusted.cert.pem().into_bytes(),
        Some("hellojohn-node".to_string()),
    )
}

async fn start_server(tls: &PeerTls) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr").to_string();
    let router = Router::new().route("/ping", get(|| async { "pong" }));
    let config = tls.server_config().expect("server config");
    tokio::spawn(serve(listener, router, Some(config), std::future::pending()));
    addr
}

#[tokio::test]
async fn peers_from_the_cluster_ca_are_accepted() {
    let ca = authority();
    let server_tls = node_material(&ca, &ca);
    let addr = start_server(&server_tls).await;

    let client_tls = node_material(&ca, &ca);
    let (client, base) = client_tls.client_for(&addr).expect("client");
    assert!(base.starts_with("https://hellojohn-node:"));
    let body = client
        .get(format!("{base}/ping"))
        .send()
        .await
        .expect("request")
        .text()
        .await
        .expect("body");
    assert_eq!(body, "pong");
}

#[tokio::test]
async fn peers_from_another_ca_are_rejected() {
    let ca = authority();
    let rogue = authority();
    let server_tls = node_material(&ca, &ca);
    let addr = start_server(&server_tls).await;

    // Signed by a foreign CA but trusting the cluster CA.
    let intruder = node_material(&rogue, &ca);
    let (client, base) = intruder.client_for(&addr).expect("client");
    let result = client.get(format!("{base}/ping")).send().await;
    assert!(result.is_err());
}

#[tokio::test]
async fn clients_without_certificates_are_rejected() {
    let ca = authority();
    let server_tls = node_material(&ca, &ca);
    let addr = start_server(&server_tls).await;

    let root = reqwest::Certificate::from_pem(ca.cert.pem().as_bytes()).expect("root");
    let client = reqwest::Client::builder()
        .use_rustls_tls()
        .tls_built_in_root_certs(false)
        .add_root_certificate(root)
        .resolve("hellojohn-node", addr.parse().expect("socket addr"))
        .build()
        .expect("client");
    let port = addr.rsplit(':').next().expect("port");
    let result = client
        .get(format!("https://hellojohn-node:{port}/ping"))
        .send()
        .await;
    assert!(result.is_err());
}
