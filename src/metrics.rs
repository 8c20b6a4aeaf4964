use lazy_static::lazy_static;
use num::NumCast;
use prometheus::{GaugeVec, register_gauge_vec};

use crate::diag::IdentityReport;

lazy_static! {
    static ref CERTIFICATE_EXPIRATION: GaugeVec = register_gauge_vec!(
        "cluster_tls_certificate_valid_until",
        "Expiration time of the TLS certificate presented on each boundary",
        &["boundary"],
    )
    .unwrap();
}

fn set(gauge: &GaugeVec, identities: &[IdentityReport]) {
    for id in identities {
        let boundary = id.role.to_string();
        gauge
            .with_label_values(&[boundary.as_str()])
            .set(<f64 as NumCast>::from(id.not_after.unix_timestamp()).unwrap_or_default());
    }
}

pub(crate) fn update(identities: &[IdentityReport]) {
    set(&CERTIFICATE_EXPIRATION, identities)
}
