//! Owner and group name cache
//!
//! Listing entries only carry numeric ids. The cache maps them to names from
//! the remote user and group databases, loaded once per connection and
//! replaced on the next one.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use tracing::{debug, info, warn};

use crate::ports::CommandRunner;

const USERS_SENTINEL: &str = "===USERS===";
const GROUPS_SENTINEL: &str = "===GROUPS===";

/// Prints both databases in one round trip, each preceded by its sentinel
pub const BATCH_COMMAND: &str =
    "(echo '===USERS==='; getent passwd; echo '===GROUPS==='; getent group)";
pub const PASSWD_COMMAND: &str = "cat /etc/passwd";
pub const GROUP_COMMAND: &str = "cat /etc/group";

type NameTable = HashMap<u32, String>;

/// uid/gid to name lookups for one remote host
#[derive(Debug, Default)]
pub struct PermissionCache {
    users: RwLock<NameTable>,
    groups: RwLock<NameTable>,
}

impl PermissionCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the user and group databases through `runner`.
    ///
    /// Tries the batched `getent` command first and falls back to reading
    /// `/etc/passwd` and `/etc/group` one by one. Never fails: ids that could
    /// not be resolved are shown numerically.
    pub async fn preload(&self, runner: &dyn CommandRunner) {
        info!("Preloading remote users and groups");

        let batch = runner.run(BATCH_COMMAND).await;
        let (users, groups) = if batch.success() {
            parse_batch(&batch.stdout)
        } else {
            warn!(
                exit_code = batch.exit_code,
                error = batch.error.as_deref().unwrap_or(""),
                "getent failed, reading account files instead"
            );
            fallback(runner).await
        };

        info!(users = users.len(), groups = groups.len(), "Preloaded users and groups");
        *self.users.write().unwrap_or_else(PoisonError::into_inner) = users;
        *self.groups.write().unwrap_or_else(PoisonError::into_inner) = groups;
    }

    /// Forget every cached name; the tables belong to one connection.
    pub fn clear(&self) {
        self.users.write().unwrap_or_else(PoisonError::into_inner).clear();
        self.groups.write().unwrap_or_else(PoisonError::into_inner).clear();
    }

    /// Name of `uid`, or the id itself when unknown.
    #[must_use]
    pub fn username(&self, uid: u32) -> String {
        lookup(&self.users, uid)
    }

    /// Name of `gid`, or the id itself when unknown.
    #[must_use]
    pub fn group_name(&self, gid: u32) -> String {
        lookup(&self.groups, gid)
    }

    #[must_use]
    pub fn user_count(&self) -> usize {
        self.users.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    #[must_use]
    pub fn group_count(&self) -> usize {
        self.groups.read().unwrap_or_else(PoisonError::into_inner).len()
    }
}

fn lookup(table: &RwLock<NameTable>, id: u32) -> String {
    table
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .get(&id)
        .cloned()
        .unwrap_or_else(|| id.to_string())
}

async fn fallback(runner: &dyn CommandRunner) -> (NameTable, NameTable) {
    let passwd = runner.run(PASSWD_COMMAND).await;
    let users = if passwd.success() {
        parse_database(&passwd.stdout)
    } else {
        warn!(error = passwd.error.as_deref().unwrap_or(""), "Failed to read /etc/passwd");
        NameTable::new()
    };

    let group = runner.run(GROUP_COMMAND).await;
    let groups = if group.success() {
        parse_database(&group.stdout)
    } else {
        warn!(error = group.error.as_deref().unwrap_or(""), "Failed to read /etc/group");
        NameTable::new()
    };

    (users, groups)
}

/// One `name:x:id:...` record, if it has a name and a numeric id.
fn parse_record(line: &str) -> Option<(u32, String)> {
    let mut parts = line.split(':');
    let name = parts.next()?;
    let _password = parts.next()?;
    let id = parts.next()?.parse().ok()?;
    Some((id, name.to_string()))
}

/// Parse a passwd or group file.
#[must_use]
pub fn parse_database(text: &str) -> HashMap<u32, String> {
    text.lines().filter_map(parse_record).collect()
}

/// Split the batched output on its sentinels and parse each half.
///
/// Lines before the first sentinel are ignored.
#[must_use]
pub fn parse_batch(text: &str) -> (HashMap<u32, String>, HashMap<u32, String>) {
    enum Section {
        None,
        Users,
        Groups,
    }

    let mut users = NameTable::new();
    let mut groups = NameTable::new();
    let mut section = Section::None;

    for line in text.lines() {
        match line {
            USERS_SENTINEL => section = Section::Users,
            GROUPS_SENTINEL => section = Section::Groups,
            _ => {
                let table = match section {
                    Section::Users => &mut users,
                    Section::Groups => &mut groups,
                    Section::None => continue,
                };
                if let Some((id, name)) = parse_record(line) {
                    table.insert(id, name);
                } else {
                    debug!(line = %line, "Skipping account record");
                }
            }
        }
    }

    (users, groups)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::exec::mock::MockRunner;

    const PASSWD: &str = "root:x:0:0:root:/root:/bin/bash\n\
                          daemon:x:1:1:daemon:/usr/sbin:/usr/sbin/nologin\n\
                          deploy:x:1000:1000:Deploy,,,:/home/deploy:/bin/bash";
    const GROUP: &str = "root:x:0:\nadm:x:4:syslog,deploy\ndeploy:x:1000:";

    fn batch_output() -> String {
        format!("{USERS_SENTINEL}\n{PASSWD}\n{GROUPS_SENTINEL}\n{GROUP}\n")
    }

    // ============== Parsing ==============

    #[test]
    fn test_parse_database() {
        let users = parse_database(PASSWD);
        assert_eq!(users.len(), 3);
        assert_eq!(users[&0], "root");
        assert_eq!(users[&1000], "deploy");
    }

    #[test]
    fn test_parse_skips_short_and_non_numeric_records() {
        let table = parse_database("short:x\nbad:x:notanumber:\n\nok:x:7:\n+::::::");
        assert_eq!(table.len(), 1);
        assert_eq!(table[&7], "ok");
    }

    #[test]
    fn test_parse_batch_splits_sections() {
        let (users, groups) = parse_batch(&batch_output());
        assert_eq!(users.len(), 3);
        assert_eq!(groups.len(), 3);
        assert_eq!(groups[&4], "adm");
        assert_eq!(users[&1], "daemon");
    }

    #[test]
    fn test_parse_batch_ignores_preamble() {
        let (users, groups) = parse_batch("motd:x:5:\n===USERS===\nalice:x:1001:1001::/home/alice:/bin/sh");
        assert_eq!(users.len(), 1);
        assert!(groups.is_empty());
    }

    // ============== Preload ==============

    #[tokio::test]
    async fn test_preload_from_batch() {
        let runner = MockRunner::new().with(BATCH_COMMAND, &batch_output());
        let cache = PermissionCache::new();
        cache.preload(&runner).await;

        assert_eq!(cache.username(1000), "deploy");
        assert_eq!(cache.group_name(4), "adm");
        assert_eq!(runner.calls(), vec![BATCH_COMMAND.to_string()]);
    }

    #[tokio::test]
    async fn test_preload_falls_back_to_files() {
        let runner = MockRunner::new()
            .with_failure(BATCH_COMMAND, 127)
            .with(PASSWD_COMMAND, PASSWD)
            .with(GROUP_COMMAND, GROUP);
        let cache = PermissionCache::new();
        cache.preload(&runner).await;

        assert_eq!(cache.user_count(), 3);
        assert_eq!(cache.group_count(), 3);
        assert_eq!(runner.calls().len(), 3);
    }

    #[tokio::test]
    async fn test_unknown_ids_render_numerically() {
        let runner = MockRunner::new().with_failure(BATCH_COMMAND, 1);
        let cache = PermissionCache::new();
        cache.preload(&runner).await;

        assert_eq!(cache.username(1234), "1234");
        assert_eq!(cache.group_name(0), "0");
    }

    #[tokio::test]
    async fn test_preload_replaces_previous_connection() {
        let cache = PermissionCache::new();
        let first = MockRunner::new().with(
            BATCH_COMMAND,
            "===USERS===\nalice:x:1000:1000::/home/alice:/bin/sh\n===GROUPS===\nstaff:x:50:\n",
        );
        cache.preload(&first).await;
        assert_eq!(cache.username(1000), "alice");

        let second = MockRunner::new().with_failure(BATCH_COMMAND, 1);
        cache.preload(&second).await;
        assert_eq!(cache.username(1000), "1000");
        assert_eq!(cache.group_name(50), "50");
    }

    #[tokio::test]
    async fn test_clear_forgets_names() {
        let runner = MockRunner::new().with(BATCH_COMMAND, &batch_output());
        let cache = PermissionCache::new();
        cache.preload(&runner).await;
        cache.clear();

        assert_eq!(cache.user_count(), 0);
        assert_eq!(cache.group_count(), 0);
        assert_eq!(cache.username(0), "0");
    }
}
