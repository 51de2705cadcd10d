//! Quorum arithmetic for group membership changes.
//!
//! A group replication group keeps accepting writes only while a strict
//! majority of its members is online. Removing a member is safe when the
//! members left behind still hold that majority.

/// Whether `online` of `total` members form a strict majority.
///
/// An empty group trivially has quorum: there is nothing left to protect.
pub fn has_majority(online: usize, total: usize) -> bool {
    total == 0 || online * 2 > total
}

/// Check whether `target` can leave the group.
///
/// `members` lists every member still in the group with its online flag.
/// Returns a description of the shortfall when removal would break quorum.
pub fn check_removal(members: &[(String, bool)], target: &str) -> Result<(), String> {
    let remaining: Vec<_> = members.iter().filter(|(name, _)| name != target).collect();
    let online = remaining.iter().filter(|(_, online)| *online).count();
    if has_majority(online, remaining.len()) {
        Ok(())
    } else {
        Err(format!(
            "removing {target} leaves {online} of {} members online",
            remaining.len()
        ))
    }
}
