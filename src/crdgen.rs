use kube::CustomResourceExt;
use mcrt_controller::crd::ManagedCertificate;

fn main() {
    print!("{}", serde_yaml::to_string(&ManagedCertificate::crd()).unwrap())
}
