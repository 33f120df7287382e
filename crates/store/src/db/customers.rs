//! Customer repository.

use tracing::instrument;

use storefront_core::{CustomerId, Email};

use super::{Executor, Model, RepositoryError, Result, Value, create};
use crate::models::{Customer, CustomerInput};

/// Repository for customer operations.
pub struct CustomerRepository<'a, E: Executor + ?Sized> {
    db: &'a E,
}

impl<'a, E: Executor + ?Sized> CustomerRepository<'a, E> {
    /// Create a new customer repository.
    #[must_use]
    pub const fn new(db: &'a E) -> Self {
        Self { db }
    }

    /// All customers ordered by first then last name.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    pub async fn list(&self) -> Result<Vec<Customer>> {
        Customer::objects()
            .order_by([Customer::FIRST_NAME.asc(), Customer::LAST_NAME.asc()])
            .all(self.db)
            .await
    }

    /// Get a customer by id.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::NotFound` if no customer has this id.
    pub async fn get(&self, id: CustomerId) -> Result<Customer> {
        Customer::objects()
            .filter(Customer::ID.eq(id))
            .get(self.db)
            .await
    }

    /// Get a customer by email address.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    pub async fn get_by_email(&self, email: &Email) -> Result<Option<Customer>> {
        Customer::objects()
            .filter(Customer::EMAIL.eq(email.clone()))
            .first(self.db)
            .await
    }

    /// Insert a customer.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Conflict` if the email is already in use.
    #[instrument(skip(self, input), fields(email = %input.email))]
    pub async fn create(&self, input: &CustomerInput) -> Result<Customer> {
        let customer: Customer = create(
            self.db,
            vec![
                ("first_name", Value::from(input.first_name.as_str())),
                ("last_name", Value::from(input.last_name.as_str())),
                ("email", Value::from(input.email.clone())),
                ("phone", Value::from(input.phone.as_str())),
                ("birth_date", Value::from(input.birth_date)),
                ("membership", Value::from(input.membership)),
            ],
        )
        .await?;
        tracing::info!(customer_id = %customer.id, "customer created");
        Ok(customer)
    }

    /// Replace every writable column of a customer.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::NotFound` if the customer does not exist and
    /// `RepositoryError::Conflict` if the email belongs to someone else.
    #[instrument(skip(self, input), fields(customer_id = %id))]
    pub async fn update(&self, id: CustomerId, input: &CustomerInput) -> Result<Customer> {
        let changed = Customer::objects()
            .filter(Customer::ID.eq(id))
            .update(
                self.db,
                [
                    Customer::FIRST_NAME.set(input.first_name.clone()),
                    Customer::LAST_NAME.set(input.last_name.clone()),
                    Customer::EMAIL.set(input.email.clone()),
                    Customer::PHONE.set(input.phone.clone()),
                    Customer::BIRTH_DATE.set(input.birth_date),
                    Customer::MEMBERSHIP.set(input.membership),
                ],
            )
            .await?;
        if changed == 0 {
            return Err(RepositoryError::NotFound);
        }
        self.get(id).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::NaiveDate;
    use storefront_core::Membership;

    use super::*;
    use crate::db::Db;
    use crate::models::SCHEMA;

    fn input(first: &str, last: &str, email: &str) -> CustomerInput {
        CustomerInput {
            first_name: first.into(),
            last_name: last.into(),
            email: Email::parse(email).unwrap(),
            phone: "555-0100".into(),
            birth_date: None,
            membership: Membership::default(),
        }
    }

    #[tokio::test]
    async fn test_create_defaults_to_bronze() {
        let db = Db::memory(SCHEMA);
        let repo = CustomerRepository::new(&db);
        let customer = repo
            .create(&input("Ada", "Lovelace", "ada@example.com"))
            .await
            .unwrap();
        assert_eq!(customer.membership, Membership::Bronze);

        let found = repo
            .get_by_email(&Email::parse("ada@example.com").unwrap())
            .await
            .unwrap();
        assert_eq!(found, Some(customer));
    }

    #[tokio::test]
    async fn test_duplicate_email_conflicts() {
        let db = Db::memory(SCHEMA);
        let repo = CustomerRepository::new(&db);
        repo.create(&input("Ada", "Lovelace", "ada@example.com"))
            .await
            .unwrap();
        let err = repo
            .create(&input("Ada", "Byron", "ada@example.com"))
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_list_orders_by_name_and_update() {
        let db = Db::memory(SCHEMA);
        let repo = CustomerRepository::new(&db);
        let grace = repo
            .create(&input("Grace", "Hopper", "grace@example.com"))
            .await
            .unwrap();
        repo.create(&input("Alan", "Turing", "alan@example.com"))
            .await
            .unwrap();

        let names: Vec<String> = repo
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.first_name)
            .collect();
        assert_eq!(names, vec!["Alan", "Grace"]);

        let mut changed = input("Grace", "Hopper", "grace@example.com");
        changed.membership = Membership::Gold;
        changed.birth_date = NaiveDate::from_ymd_opt(1906, 12, 9);
        let updated = repo.update(grace.id, &changed).await.unwrap();
        assert_eq!(updated.membership, Membership::Gold);
        assert_eq!(updated.birth_date, NaiveDate::from_ymd_opt(1906, 12, 9));
    }
}
