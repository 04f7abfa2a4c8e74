use serde::Serialize;

use crate::error::{Error, Result};
use crate::gcp::CloudProvider;

/// IP address and fully-qualified VPC network of a Filestore instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NetworkInfo {
    pub ip_address: String,
    pub network: String,
}

/// Look up the Filestore instance's first network and first IP address.
///
/// The project id inside the returned network name is replaced (first
/// occurrence only) by the numeric project number, which is the form
/// Vertex AI custom jobs expect for VPC peering.
pub fn resolve_network_info(
    provider: &dyn CloudProvider,
    project_id: &str,
    instance_id: &str,
    location: &str,
) -> Result<NetworkInfo> {
    crate::log_status!("network", "Resolving project number for {}", project_id);
    let project_number = provider.project_number(project_id)?;

    let instance_name = format!(
        "projects/{}/locations/{}/instances/{}",
        project_id, location, instance_id
    );
    crate::log_status!("network", "Fetching Filestore instance {}", instance_name);
    let instance = provider.filestore_instance(&instance_name)?;

    let first = instance.networks.first().ok_or_else(|| {
        Error::network_not_found(&instance_name, "instance declares no networks")
    })?;

    let ip_address = first.ip_addresses.first().ok_or_else(|| {
        Error::network_not_found(&instance_name, "first network has no IP addresses")
    })?;

    if first.network.is_empty() {
        return Err(Error::network_not_found(
            &instance_name,
            "first network has an empty name",
        ));
    }

    Ok(NetworkInfo {
        ip_address: ip_address.clone(),
        network: first.network.replacen(project_id, &project_number, 1),
    })
}
