use kube::CustomResourceExt;

fn main() -> anyhow::Result<()> {
    let crd = permission_claim_operator::resources::PermissionClaim::crd();
    print!("{}", serde_yaml::to_string(&crd)?);
    Ok(())
}
