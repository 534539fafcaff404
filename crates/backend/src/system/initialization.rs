use anyhow::Result;
use sea_orm::DatabaseConnection;

use crate::system::auth::password;
use crate::system::users::{repository, service};
use contracts::system::users::CreateUserDto;

/// Ensure admin user exists (create if table is empty).
/// Returns the generated password when the account was created.
pub async fn ensure_admin_user_exists(db: &DatabaseConnection) -> Result<Option<String>> {
    if repository::count_users(db).await? > 0 {
        return Ok(None);
    }

    tracing::info!("No users found. Creating default admin user...");

    let generated = password::generate_password();
    let admin_dto = CreateUserDto {
        username: "admin".to_string(),
        password: generated.clone(),
        email: None,
        full_name: Some("Administrator".to_string()),
        is_admin: true,
    };

    let admin_id = service::create(db, admin_dto, None).await?;

    tracing::warn!("Default admin user created (id {})", admin_id);
    tracing::warn!("  Username: admin");
    tracing::warn!("  Password: {}", generated);
    tracing::warn!("  Change the password after the first login");

    Ok(Some(generated))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::data::db::connect_in_memory;

    #[tokio::test]
    async fn admin_is_created_once() {
        let db = connect_in_memory().await;

        let generated = ensure_admin_user_exists(&db).await.unwrap().unwrap();
        let admin = service::verify_credentials(&db, "admin", &generated)
            .await
            .unwrap()
            .unwrap();
        assert!(admin.is_admin);

        assert!(ensure_admin_user_exists(&db).await.unwrap().is_none());
        assert_eq!(repository::count_users(&db).await.unwrap(), 1);
    }
}
