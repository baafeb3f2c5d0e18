//! Emits the CustomResourceDefinition YAML for both kinds.
//!
//! ```bash
//! cargo run --bin crdgen > config/crd/gitchange.yaml
//! cargo run --bin crdgen | kubectl apply -f -
//! ```

use gitchange::api::{GitCommit, PullRequest};
use kube::CustomResourceExt;

fn main() {
    println!("# Generated by crdgen; do not edit by hand.");
    for crd in [GitCommit::crd(), PullRequest::crd()] {
        match serde_yaml::to_string(&crd) {
            Ok(yaml) => {
                println!("---");
                print!("{yaml}");
            }
            Err(e) => {
                eprintln!("failed to serialize CRD: {e}");
                std::process::exit(1);
            }
        }
    }
}
