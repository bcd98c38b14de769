//! Recipient resolution.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use super::events::RecipientClass;
use crate::config::{DirectoryUser, UserRole};
use crate::errors::StoreError;
use crate::models::{ReportId, UserId};
use crate::store::ReportStore;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Recipient {
    pub user_id: UserId,
    pub address: String,
}

/// The external user directory.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Resolve `class` to concrete recipients. Author and supervisor classes
    /// need `report_id`; they resolve to nothing without it.
    async fn resolve_recipients(
        &self,
        class: RecipientClass,
        report_id: Option<ReportId>,
    ) -> Result<Vec<Recipient>, StoreError>;
}

/// Directory built from the `[[directory.users]]` config table.
///
/// Report authors are looked up through the report store.
pub struct StaticDirectory {
    users: HashMap<UserId, DirectoryUser>,
    reports: Arc<dyn ReportStore>,
}

impl StaticDirectory {
    pub fn new(users: Vec<DirectoryUser>, reports: Arc<dyn ReportStore>) -> Self {
        Self {
            users: users.into_iter().map(|u| (u.id, u)).collect(),
            reports,
        }
    }

    fn recipient(user: &DirectoryUser) -> Recipient {
        Recipient {
            user_id: user.id,
            address: user.email.clone(),
        }
    }

    fn with_role(&self, role: UserRole) -> Vec<Recipient> {
        let mut recipients: Vec<Recipient> = self
            .users
            .values()
            .filter(|u| u.role == role)
            .map(Self::recipient)
            .collect();
        recipients.sort_by_key(|r| r.user_id);
        recipients
    }

    async fn author_of(&self, report_id: ReportId) -> Result<Option<&DirectoryUser>, StoreError> {
        let report = self.reports.get(report_id).await?;
        let user = self.users.get(&report.author_id);
        if user.is_none() {
            tracing::warn!(%report_id, author_id = %report.author_id, "report author missing from directory");
        }
        Ok(user)
    }
}

#[async_trait]
impl UserDirectory for StaticDirectory {
    async fn resolve_recipients(
        &self,
        class: RecipientClass,
        report_id: Option<ReportId>,
    ) -> Result<Vec<Recipient>, StoreError> {
        match class {
            RecipientClass::AdminSet => Ok(self.with_role(UserRole::Admin)),
            RecipientClass::SuperAdminSet => Ok(self.with_role(UserRole::SuperAdmin)),
            RecipientClass::Author => {
                let Some(report_id) = report_id else {
                    return Ok(Vec::new());
                };
                Ok(self
                    .author_of(report_id)
                    .await?
                    .map(Self::recipient)
                    .into_iter()
                    .collect())
            }
            RecipientClass::Supervisor => {
                let Some(report_id) = report_id else {
                    return Ok(Vec::new());
                };
                let supervisor = self
                    .author_of(report_id)
                    .await?
                    .and_then(|author| author.supervisor_id)
                    .and_then(|id| self.users.get(&id));
                Ok(supervisor.map(Self::recipient).into_iter().collect())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewReport;
    use crate::store::MemoryStore;

    fn user(id: i64, role: UserRole, supervisor: Option<i64>) -> DirectoryUser {
        DirectoryUser {
            id: UserId(id),
            email: format!("user{}@example.com", id),
            role,
            supervisor_id: supervisor.map(UserId),
        }
    }

    async fn fixture() -> (StaticDirectory, ReportId) {
        let store = Arc::new(MemoryStore::new());
        let report = store
            .insert(NewReport {
                author_id: UserId(1),
                title: "t".into(),
                period: "p".into(),
                content: "c".into(),
            })
            .await
            .unwrap();
        let users = vec![
            user(1, UserRole::Employee, Some(2)),
            user(2, UserRole::Supervisor, None),
            user(3, UserRole::Admin, None),
            user(4, UserRole::Admin, None),
            user(5, UserRole::SuperAdmin, None),
        ];
        (StaticDirectory::new(users, store), report.id)
    }

    #[tokio::test]
    async fn author_and_supervisor_resolve_through_report() {
        let (dir, report_id) = fixture().await;
        let author = dir
            .resolve_recipients(RecipientClass::Author, Some(report_id))
            .await
            .unwrap();
        assert_eq!(author[0].address, "user1@example.com");

        let supervisor = dir
            .resolve_recipients(RecipientClass::Supervisor, Some(report_id))
            .await
            .unwrap();
        assert_eq!(supervisor[0].user_id, UserId(2));
    }

    #[tokio::test]
    async fn admin_sets_resolve_by_role() {
        let (dir, _) = fixture().await;
        let admins = dir.resolve_recipients(RecipientClass::AdminSet, None).await.unwrap();
        assert_eq!(admins.len(), 2);
        let supers = dir
            .resolve_recipients(RecipientClass::SuperAdminSet, None)
            .await
            .unwrap();
        assert_eq!(supers.len(), 1);
    }

    #[tokio::test]
    async fn report_scoped_class_without_report_is_empty() {
        let (dir, _) = fixture().await;
        assert!(dir
            .resolve_recipients(RecipientClass::Author, None)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn unknown_report_propagates_not_found() {
        let (dir, _) = fixture().await;
        let err = dir
            .resolve_recipients(RecipientClass::Author, Some(ReportId(77)))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }
}
