#[path = "../tests/support/ca.rs"]
mod ca;

pub(crate) use ca::TestCa;

use crate::ca::RootCa;

impl TestCa {
    pub fn root(&self) -> RootCa {
        RootCa::from_pem(self.cert_pem.as_bytes(), self.key_pem.as_bytes()).unwrap()
    }
}

pub(crate) fn generate_ca() -> TestCa {
    ca::generate_ca("devtls Test CA")
}
