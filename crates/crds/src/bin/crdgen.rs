//! Prints the MachineRequest CRD as YAML.

use crds::MachineRequest;
use kube::CustomResourceExt;

fn main() -> anyhow::Result<()> {
    print!("{}", serde_yaml::to_string(&MachineRequest::crd())?);
    Ok(())
}
