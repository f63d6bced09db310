use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use ledgerline_core::auth::UserRole;
use ledgerline_core::error::CoreError;

use crate::db::schema::users;

/// Row in the global user directory (`public.users`).
///
/// `tenant_id` is null for lobby users; onboarding sets it exactly once.
#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Selectable)]
#[diesel(table_name = users)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub password_hash: String,
    pub salt: String,
    pub full_name: String,
    pub role: String,
    pub tenant_id: Option<Uuid>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_login: Option<DateTime<Utc>>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = users)]
pub struct NewUser {
    pub email: String,
    pub password_hash: String,
    pub salt: String,
    pub full_name: String,
    pub role: String,
    pub tenant_id: Option<Uuid>,
    pub is_active: bool,
}

impl User {
    /// Verify password against stored hash
    pub fn verify_password(&self, password: &str) -> bool {
        use sha2::{Digest, Sha256};

        let mut hasher = Sha256::new();
        hasher.update(password.as_bytes());
        hasher.update(self.salt.as_bytes());
        let computed_hash = format!("{:x}", hasher.finalize());

        computed_hash == self.password_hash
    }

    pub fn can_login(&self) -> bool {
        self.is_active
    }

    pub fn is_lobby(&self) -> bool {
        self.tenant_id.is_none()
    }

    /// The directory is authoritative for roles; a row with an unknown role
    /// string is treated as a directory corruption error.
    pub fn parsed_role(&self) -> Result<UserRole, CoreError> {
        UserRole::parse(&self.role)
            .ok_or_else(|| CoreError::database(format!("user {} has unknown role", self.id)))
    }
}

impl NewUser {
    /// Create a new lobby user with hashed password
    pub fn lobby(email: String, full_name: String, password: &str) -> Self {
        use rand::{thread_rng, Rng};
        use sha2::{Digest, Sha256};

        let salt: String = (0..32)
            .map(|_| thread_rng().gen_range(0x21..0x7Fu8) as char)
            .collect();

        let mut hasher = Sha256::new();
        hasher.update(password.as_bytes());
        hasher.update(salt.as_bytes());
        let password_hash = format!("{:x}", hasher.finalize());

        Self {
            email,
            password_hash,
            salt,
            full_name,
            role: UserRole::Staff.as_str().to_string(),
            tenant_id: None,
            is_active: true,
        }
    }
}

/// Repository over the global user directory.
pub struct UserRepository<'a> {
    connection: &'a mut PgConnection,
}

impl<'a> UserRepository<'a> {
    pub fn new(connection: &'a mut PgConnection) -> Self {
        Self { connection }
    }

    pub fn find_by_id(&mut self, user_id: Uuid) -> Result<Option<User>, diesel::result::Error> {
        use crate::db::schema::users::dsl;

        users::table
            .filter(dsl::id.eq(user_id))
            .first::<User>(self.connection)
            .optional()
    }

    /// Find by email, preferring a lobby row over tenant-bound rows so the
    /// login flow resolves new registrations first.
    pub fn find_by_email(&mut self, email: &str) -> Result<Option<User>, diesel::result::Error> {
        use crate::db::schema::users::dsl;

        users::table
            .filter(dsl::email.eq(email))
            .order(dsl::tenant_id.asc().nulls_first())
            .first::<User>(self.connection)
            .optional()
    }

    pub fn create(&mut self, new_user: NewUser) -> Result<User, diesel::result::Error> {
        diesel::insert_into(users::table)
            .values(&new_user)
            .get_result(self.connection)
    }

    /// Onboarding transition: bind a lobby user to a tenant and elevate to
    /// ADMIN. The `tenant_id IS NULL` guard makes the null → non-null
    /// transition happen at most once; a second attempt is a state error.
    pub fn link_to_tenant(&mut self, user_id: Uuid, tenant: Uuid) -> Result<User, CoreError> {
        use crate::db::schema::users::dsl;

        let updated = diesel::update(
            users::table
                .filter(dsl::id.eq(user_id))
                .filter(dsl::tenant_id.is_null()),
        )
        .set((
            dsl::tenant_id.eq(Some(tenant)),
            dsl::role.eq(UserRole::Admin.as_str()),
            dsl::updated_at.eq(Utc::now()),
        ))
        .get_result::<User>(self.connection)
        .optional()
        .map_err(|e| CoreError::database(format!("failed to link owner to tenant: {}", e)))?;

        updated.ok_or_else(|| {
            CoreError::forbidden("user is already bound to an organization")
        })
    }

    /// Compensating step for provisioning rollback. Tolerates a row that was
    /// never linked or is already gone.
    pub fn unlink_from_tenant(&mut self, user_id: Uuid, tenant: Uuid) -> Result<(), CoreError> {
        use crate::db::schema::users::dsl;

        diesel::update(
            users::table
                .filter(dsl::id.eq(user_id))
                .filter(dsl::tenant_id.eq(Some(tenant))),
        )
        .set((
            dsl::tenant_id.eq(None::<Uuid>),
            dsl::role.eq(UserRole::Staff.as_str()),
            dsl::updated_at.eq(Utc::now()),
        ))
        .execute(self.connection)
        .map_err(|e| CoreError::database(format!("failed to unlink owner: {}", e)))?;

        Ok(())
    }

    pub fn update_last_login(&mut self, user_id: Uuid) -> Result<(), diesel::result::Error> {
        use crate::db::schema::users::dsl;

        diesel::update(users::table.filter(dsl::id.eq(user_id)))
            .set(dsl::last_login.eq(Some(Utc::now())))
            .execute(self.connection)?;

        Ok(())
    }

    /// Validate user credentials
    pub fn validate_credentials(
        &mut self,
        email: &str,
        password: &str,
    ) -> Result<Option<User>, diesel::result::Error> {
        if let Some(user) = self.find_by_email(email)? {
            if user.can_login() && user.verify_password(password) {
                if let Err(e) = self.update_last_login(user.id) {
                    log::warn!("Failed to update last login for user {}: {}", email, e);
                }
                return Ok(Some(user));
            }
        }
        Ok(None)
    }
}
