//! Level and scope authorization.
//!
//! [`Authorizer`] decides whether a caller may perform an operation on an
//! entity and, for divider-scoped entities, on a particular instance. It only
//! reads the data handed to it; every decision is a pure function of the
//! caller, the compiled entity and the instance state.

use std::collections::BTreeSet;

use thiserror::Error;
use tracing::debug;

use crate::datamodel::CompiledEntity;
use crate::types::{GrantAccess, GranteeKind, Level, Operation, Record, RecordGrants, User};

/// An authenticated caller and the memberships its decisions depend on.
#[derive(Debug, Clone)]
pub struct Principal {
    pub user: User,
    /// Uids of the divider instances the user belongs to.
    pub dividers: BTreeSet<String>,
    /// Uids of the groups the user belongs to.
    pub groups: BTreeSet<String>,
    /// Ids of the ACL roles the user holds.
    pub roles: BTreeSet<String>,
}

impl Principal {
    #[must_use]
    pub const fn level(&self) -> Level {
        self.user.level()
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.user.id
    }
}

/// Why a request was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Denial {
    /// No credential, and the operation is not open to anonymous callers.
    #[error("authentication required")]
    Unauthenticated,

    /// The caller's level (or role) does not admit the operation.
    #[error("insufficient level")]
    Forbidden,

    /// The instance is outside the caller's scope. Indistinguishable from a
    /// missing instance.
    #[error("not found")]
    NotFound,

    /// Level change above the caller's own level.
    #[error("cannot grant a level above your own")]
    ExceedsCeiling,
}

/// The scope-relevant state of one instance.
#[derive(Debug, Clone, Copy)]
pub struct InstanceView<'a> {
    pub divider: Option<&'a str>,
    pub public: bool,
    pub additional_filtering: bool,
    pub grants: &'a RecordGrants,
}

impl<'a> From<&'a Record> for InstanceView<'a> {
    fn from(record: &'a Record) -> Self {
        Self {
            divider: record.divider.as_deref(),
            public: record.public,
            additional_filtering: record.additional_filtering,
            grants: &record.grants,
        }
    }
}

/// Which instances of an entity a caller may list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetrievalScope {
    All,
    Filtered(ScopeFilter),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScopeFilter {
    /// `None` for anonymous callers, who only see public instances.
    pub user_id: Option<String>,
    pub dividers: BTreeSet<String>,
    pub groups: BTreeSet<String>,
}

impl RetrievalScope {
    #[must_use]
    pub fn admits(&self, instance: InstanceView<'_>) -> bool {
        match self {
            RetrievalScope::All => true,
            RetrievalScope::Filtered(filter) => instance_visible(
                filter.user_id.as_deref(),
                &filter.dividers,
                &filter.groups,
                instance,
                Operation::Retrieve,
            ),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Authorizer {
    acl_roles_enabled: bool,
}

impl Authorizer {
    #[must_use]
    pub const fn new(acl_roles_enabled: bool) -> Self {
        Self { acl_roles_enabled }
    }

    /// Entity-level gate. `bound_roles` are the roles bound to this entity and
    /// operation; they only matter when ACL roles are enabled.
    pub fn check_operation(
        &self,
        principal: Option<&Principal>,
        entity: &CompiledEntity,
        operation: Operation,
        bound_roles: &BTreeSet<String>,
    ) -> Result<(), Denial> {
        let minimum = entity.minimum_level(operation);

        let Some(principal) = principal else {
            return if minimum.admits_anonymous() {
                Ok(())
            } else {
                Err(Denial::Unauthenticated)
            };
        };

        if minimum.admits(principal.level()) {
            return Ok(());
        }
        if self.acl_roles_enabled
            && principal.level() > Level::Blocked
            && !principal.roles.is_disjoint(bound_roles)
        {
            debug!(
                user = %principal.id(),
                entity = %entity.name,
                operation = %operation,
                "Admitted through ACL role"
            );
            return Ok(());
        }

        debug!(
            user = %principal.id(),
            level = %principal.level(),
            entity = %entity.name,
            operation = %operation,
            minimum = %minimum,
            "Level gate denied"
        );
        Err(Denial::Forbidden)
    }

    /// Instance scope for retrieve/update/delete. Out-of-scope instances are
    /// reported as [`Denial::NotFound`].
    pub fn check_instance(
        &self,
        principal: Option<&Principal>,
        entity: &CompiledEntity,
        operation: Operation,
        instance: InstanceView<'_>,
    ) -> Result<(), Denial> {
        if !entity.is_scoped() || principal.is_some_and(|p| p.level().bypasses_scope()) {
            return Ok(());
        }

        let empty = BTreeSet::new();
        let (user_id, dividers, groups) = match principal {
            Some(p) => (Some(p.id()), &p.dividers, &p.groups),
            None => (None, &empty, &empty),
        };

        if instance_visible(user_id, dividers, groups, instance, operation) {
            Ok(())
        } else {
            Err(Denial::NotFound)
        }
    }

    /// Level gate followed by the instance check.
    pub fn authorize(
        &self,
        principal: Option<&Principal>,
        entity: &CompiledEntity,
        operation: Operation,
        bound_roles: &BTreeSet<String>,
        instance: InstanceView<'_>,
    ) -> Result<(), Denial> {
        self.check_operation(principal, entity, operation, bound_roles)?;
        self.check_instance(principal, entity, operation, instance)
    }

    /// Non-admin callers may only create scoped instances inside one of
    /// their own dividers.
    pub fn check_create_scope(
        &self,
        principal: Option<&Principal>,
        entity: &CompiledEntity,
        divider: Option<&str>,
    ) -> Result<(), Denial> {
        if !entity.is_scoped() {
            return Ok(());
        }
        match principal {
            Some(p) if p.level().bypasses_scope() => Ok(()),
            Some(p) if divider.is_some_and(|d| p.dividers.contains(d)) => Ok(()),
            _ => Err(Denial::Forbidden),
        }
    }

    #[must_use]
    pub fn retrieval_scope(
        &self,
        principal: Option<&Principal>,
        entity: &CompiledEntity,
    ) -> RetrievalScope {
        if !entity.is_scoped() {
            return RetrievalScope::All;
        }
        match principal {
            Some(p) if p.level().bypasses_scope() => RetrievalScope::All,
            Some(p) => RetrievalScope::Filtered(ScopeFilter {
                user_id: Some(p.user.id.clone()),
                dividers: p.dividers.clone(),
                groups: p.groups.clone(),
            }),
            None => RetrievalScope::Filtered(ScopeFilter::default()),
        }
    }

    /// Elevation ceiling for changing `target`'s level to `new_level`.
    ///
    /// A superuser may set any level. Anyone else must be at least admin,
    /// may not act on a user above their own level, and may not grant a
    /// level above their own.
    pub fn check_elevation(
        &self,
        caller: &Principal,
        target: &User,
        new_level: Level,
    ) -> Result<(), Denial> {
        let caller_level = caller.level();
        if caller_level == Level::Superuser {
            return Ok(());
        }
        if caller_level < Level::Admin || target.level() > caller_level {
            return Err(Denial::Forbidden);
        }
        if new_level > caller_level {
            return Err(Denial::ExceedsCeiling);
        }
        Ok(())
    }
}

/// Scope membership, the public flag and explicit grants each admit on their
/// own. `additional_filtering` disables the scope-membership path.
fn instance_visible(
    user_id: Option<&str>,
    dividers: &BTreeSet<String>,
    groups: &BTreeSet<String>,
    instance: InstanceView<'_>,
    operation: Operation,
) -> bool {
    if instance.public {
        return true;
    }
    if !instance.additional_filtering && instance.divider.is_some_and(|d| dividers.contains(d)) {
        return true;
    }
    granted(user_id, groups, instance.grants, operation)
}

/// View lists admit retrieval only; admin lists admit every operation.
fn granted(
    user_id: Option<&str>,
    groups: &BTreeSet<String>,
    grants: &RecordGrants,
    operation: Operation,
) -> bool {
    let accesses: &[GrantAccess] = if operation == Operation::Retrieve {
        &[GrantAccess::View, GrantAccess::Admin]
    } else {
        &[GrantAccess::Admin]
    };

    accesses.iter().any(|&access| {
        user_id.is_some_and(|id| grants.list(GranteeKind::User, access).contains(id))
            || !grants.list(GranteeKind::Group, access).is_disjoint(groups)
    })
}
