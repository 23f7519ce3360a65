use super::schema::Database;
use super::types::{is_unique_violation, DatabaseError, Folder};

impl Database {
    // ========================================================================
    // Folder Operations
    // ========================================================================

    /// All folders, ordered by name.
    pub async fn list_folders(&self) -> Result<Vec<Folder>, DatabaseError> {
        let folders = sqlx::query_as::<_, Folder>("SELECT id, name FROM folders ORDER BY name, id")
            .fetch_all(&self.pool)
            .await?;
        Ok(folders)
    }

    /// Create a folder, returning its id.
    ///
    /// # Errors
    ///
    /// [`DatabaseError::Duplicate`] if a folder with this name exists.
    pub async fn create_folder(&self, name: &str) -> Result<i64, DatabaseError> {
        let row: (i64,) = sqlx::query_as("INSERT INTO folders (name) VALUES (?) RETURNING id")
            .bind(name)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| duplicate_name(e, name))?;

        tracing::debug!(folder_id = row.0, name = %name, "Folder created");
        Ok(row.0)
    }

    pub async fn rename_folder(&self, id: i64, name: &str) -> Result<(), DatabaseError> {
        let result = sqlx::query("UPDATE folders SET name = ? WHERE id = ?")
            .bind(name)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| duplicate_name(e, name))?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::not_found("folder", id));
        }
        Ok(())
    }

    /// Delete a folder. Its feeds become unfiled; no feed or article is removed.
    pub async fn delete_folder(&self, id: i64) -> Result<(), DatabaseError> {
        let mut tx = self.pool.begin().await?;

        let moved = sqlx::query("UPDATE feeds SET folder_id = NULL WHERE folder_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        let deleted = sqlx::query("DELETE FROM folders WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        if deleted == 0 {
            tx.rollback().await?;
            return Err(DatabaseError::not_found("folder", id));
        }

        tx.commit().await?;
        tracing::debug!(folder_id = id, feeds_moved = moved, "Folder deleted");
        Ok(())
    }
}

fn duplicate_name(err: sqlx::Error, name: &str) -> DatabaseError {
    if is_unique_violation(&err) {
        DatabaseError::Duplicate {
            entity: "folder",
            value: name.to_owned(),
        }
    } else {
        DatabaseError::Other(err)
    }
}
