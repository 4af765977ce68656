//! Resource Keys
//!
//! Fleet-unique persistence keys. Every resource a device owns is keyed by
//! injecting the device UUID at its owner segment, so two devices exposing
//! the same path never collide.

/// Segments whose following segment names the resource owner
const OWNER_COLLECTIONS: [&str; 5] = [
    "Systems",
    "Chassis",
    "Managers",
    "FirmwareInventory",
    "SoftwareInventory",
];

/// Segment after which every child segment is namespaced
const LICENSES: &str = "Licenses";

/// Body prefixes rewritten by [`namespace_paths`], with their canonical form
const NAMESPACED_PREFIXES: [(&str, &str); 5] = [
    ("/redfish/v1/Systems/", "/redfish/v1/Systems/"),
    ("/redfish/v1/systems/", "/redfish/v1/Systems/"),
    ("/redfish/v1/Managers/", "/redfish/v1/Managers/"),
    ("/redfish/v1/Chassis/", "/redfish/v1/Chassis/"),
    ("/redfish/v1/chassis/", "/redfish/v1/Chassis/"),
];

/// Build the persistence key of `path`.
///
/// The segment equal to `owner_id` is prefixed with `device_uuid.` when it
/// follows an owner collection; every segment following `Licenses` is
/// prefixed unless it already carries the prefix.
pub fn form_key(path: &str, owner_id: &str, device_uuid: &str) -> String {
    let path = path.strip_suffix('/').unwrap_or(path);
    let prefix = format!("{}.", device_uuid);

    let segments: Vec<&str> = path.split('/').collect();
    let mut key = Vec::with_capacity(segments.len());
    for (i, segment) in segments.iter().enumerate() {
        let previous = if i > 0 { segments[i - 1] } else { "" };
        let owned = *segment == owner_id
            && OWNER_COLLECTIONS
                .iter()
                .any(|c| c.eq_ignore_ascii_case(previous));
        let licensed = previous.eq_ignore_ascii_case(LICENSES) && !segment.starts_with(&prefix);

        if owned || licensed {
            key.push(format!("{}{}", prefix, segment));
        } else {
            key.push(segment.to_string());
        }
    }
    key.join("/")
}

/// Key of a Manager or Chassis resource: unconditional prefix after the
/// collection segment
pub fn form_root_key(path: &str, device_uuid: &str) -> String {
    path.replace(
        "/redfish/v1/Managers/",
        &format!("/redfish/v1/Managers/{}.", device_uuid),
    )
    .replace(
        "/redfish/v1/Chassis/",
        &format!("/redfish/v1/Chassis/{}.", device_uuid),
    )
}

/// Whether `path` is keyed by [`form_root_key`] rather than [`form_key`]
pub fn is_root_keyed(path: &str) -> bool {
    path.contains("/redfish/v1/Managers/") || path.contains("/redfish/v1/Chassis/")
}

/// Rewrite every Systems/Managers/Chassis reference inside a raw document
/// body into the device's namespace.
///
/// Applied exactly once to each body before it is stored.
pub fn namespace_paths(body: &str, device_uuid: &str) -> String {
    let mut output = body.to_string();
    for (from, canonical) in NAMESPACED_PREFIXES {
        output = output.replace(from, &format!("{}{}.", canonical, device_uuid));
    }
    output
}

/// Table name of a resource path.
///
/// A collection is named `<last segment>Collection`; otherwise the last
/// segment when the one before it is numeric, else the one before it.
pub fn resource_name(path: &str, is_collection: bool) -> String {
    let segments: Vec<&str> = path.split('/').collect();
    let last = segments.last().copied().unwrap_or_default();
    if is_collection {
        return format!("{}Collection", last);
    }
    match segments.len().checked_sub(2).map(|i| segments[i]) {
        Some(previous) if previous.parse::<i64>().is_ok() => last.to_string(),
        Some(previous) => previous.to_string(),
        None => last.to_string(),
    }
}

/// Key of the Manager resources sharing a system's owning device, as a
/// store glob pattern
pub fn manager_pattern(system_key: &str, device_uuid: &str) -> String {
    let id = system_key.rsplit('/').next().unwrap_or_default();
    let base = system_key
        .strip_suffix(id)
        .unwrap_or(system_key)
        .replace("Systems", "Managers");
    format!("{}{}.*", base, device_uuid)
}
