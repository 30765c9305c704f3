//! Store and product catalog management.
//!
//! Price and stock changes lock the product row, so they serialize with
//! order creation reserving stock from the same product. Adding, moving or
//! removing products locks the owning store row first, which keeps a store
//! from being deleted while a product is being attached to it.

use super::{require_scope, LifecycleError};
use crate::engine::event_bus::EventBus;
use delivery_storage::{StorageError, StorageService, Transaction};
use delivery_types::{
	truncate_id, Actor, CatalogEvent, MarketplaceEvent, NewProduct, NewStore, Product, Scope,
	StorageKey, Store, UpdateProduct, UpdateStore,
};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

pub struct CatalogService {
	storage: Arc<StorageService>,
	event_bus: EventBus,
}

impl CatalogService {
	pub fn new(storage: Arc<StorageService>, event_bus: EventBus) -> Self {
		Self { storage, event_bus }
	}

	#[instrument(skip_all)]
	pub async fn add_store(&self, actor: &Actor, store: NewStore) -> Result<Store, LifecycleError> {
		require_scope(actor, Scope::ProductsManage)?;
		let store = Store {
			id: Uuid::new_v4().to_string(),
			name: required_name(store.name, "Store")?,
			category: store.category,
		};
		let mut tx = self.storage.begin();
		tx.insert(StorageKey::Stores.as_str(), &store.id, &store, None)?;
		tx.commit().await?;

		tracing::info!(store_id = %truncate_id(&store.id), "Store added");
		self.publish(CatalogEvent::StoreAdded {
			store: store.clone(),
		});
		Ok(store)
	}

	pub async fn get_store(&self, actor: &Actor, store_id: &str) -> Result<Store, LifecycleError> {
		require_scope(actor, Scope::ProductsRead)?;
		self.storage
			.retrieve(StorageKey::Stores.as_str(), store_id)
			.await
			.map_err(|e| not_found(e, "store", store_id))
	}

	/// All stores, ordered by id.
	pub async fn list_stores(&self, actor: &Actor) -> Result<Vec<Store>, LifecycleError> {
		require_scope(actor, Scope::ProductsRead)?;
		Ok(self.storage.list(StorageKey::Stores.as_str()).await?)
	}

	#[instrument(skip_all, fields(store_id = %truncate_id(store_id)))]
	pub async fn update_store(
		&self,
		actor: &Actor,
		store_id: &str,
		update: UpdateStore,
	) -> Result<Store, LifecycleError> {
		require_scope(actor, Scope::ProductsManage)?;
		let name = update.name.map(|name| required_name(name, "Store")).transpose()?;

		let namespace = StorageKey::Stores.as_str();
		let mut tx = self.storage.begin();
		let mut store: Store = tx
			.retrieve_for_update(namespace, store_id)
			.await
			.map_err(|e| not_found(e, "store", store_id))?;
		if let Some(name) = name {
			store.name = name;
		}
		if let Some(category) = update.category {
			store.category = Some(category);
		}
		tx.update(namespace, store_id, &store)?;
		tx.commit().await?;

		tracing::info!("Store updated");
		self.publish(CatalogEvent::StoreUpdated {
			store: store.clone(),
		});
		Ok(store)
	}

	/// Removes a store. A store that still lists products cannot be removed.
	#[instrument(skip_all, fields(store_id = %truncate_id(store_id)))]
	pub async fn delete_store(&self, actor: &Actor, store_id: &str) -> Result<(), LifecycleError> {
		require_scope(actor, Scope::ProductsManage)?;
		let mut tx = self.storage.begin();
		self.lock_store(&mut tx, store_id).await?;

		let products: Vec<Product> = self.storage.list(StorageKey::Products.as_str()).await?;
		let listed = products.iter().filter(|p| p.store_id == store_id).count();
		if listed > 0 {
			return Err(LifecycleError::Validation(format!(
				"Store {} still lists {} products",
				store_id, listed
			)));
		}
		tx.delete(StorageKey::Stores.as_str(), store_id);
		tx.commit().await?;

		tracing::info!("Store removed");
		self.publish(CatalogEvent::StoreRemoved {
			store_id: store_id.to_string(),
		});
		Ok(())
	}

	#[instrument(skip_all, fields(store_id = %truncate_id(&product.store_id)))]
	pub async fn add_product(&self, actor: &Actor, product: NewProduct) -> Result<Product, LifecycleError> {
		require_scope(actor, Scope::ProductsManage)?;
		let name = required_name(product.name, "Product")?;
		if product.store_id.trim().is_empty() {
			return Err(LifecycleError::Validation("Store id must not be empty".into()));
		}
		validate_price(product.price)?;

		let product = Product {
			id: Uuid::new_v4().to_string(),
			store_id: product.store_id,
			name,
			price: product.price,
			stock: product.stock,
		};
		let mut tx = self.storage.begin();
		self.lock_store(&mut tx, &product.store_id).await?;
		tx.insert(StorageKey::Products.as_str(), &product.id, &product, None)?;
		tx.commit().await?;

		tracing::info!(product_id = %truncate_id(&product.id), "Product added");
		self.publish(CatalogEvent::ProductAdded {
			product: product.clone(),
		});
		Ok(product)
	}

	pub async fn get_product(&self, actor: &Actor, product_id: &str) -> Result<Product, LifecycleError> {
		require_scope(actor, Scope::ProductsRead)?;
		self.storage
			.retrieve(StorageKey::Products.as_str(), product_id)
			.await
			.map_err(|e| not_found(e, "product", product_id))
	}

	/// All products, ordered by id.
	pub async fn list_products(&self, actor: &Actor) -> Result<Vec<Product>, LifecycleError> {
		require_scope(actor, Scope::ProductsRead)?;
		Ok(self.storage.list(StorageKey::Products.as_str()).await?)
	}

	/// Renames a product or moves it to another existing store.
	#[instrument(skip_all, fields(product_id = %truncate_id(product_id)))]
	pub async fn update_product(
		&self,
		actor: &Actor,
		product_id: &str,
		update: UpdateProduct,
	) -> Result<Product, LifecycleError> {
		require_scope(actor, Scope::ProductsManage)?;
		let name = update.name.map(|name| required_name(name, "Product")).transpose()?;

		let namespace = StorageKey::Products.as_str();
		let mut tx = self.storage.begin();
		if let Some(store_id) = &update.store_id {
			self.lock_store(&mut tx, store_id).await?;
		}
		let mut product: Product = tx
			.retrieve_for_update(namespace, product_id)
			.await
			.map_err(|e| not_found(e, "product", product_id))?;
		if let Some(name) = name {
			product.name = name;
		}
		if let Some(store_id) = update.store_id {
			product.store_id = store_id;
		}
		tx.update(namespace, product_id, &product)?;
		tx.commit().await?;

		tracing::info!(store_id = %truncate_id(&product.store_id), "Product updated");
		self.publish(CatalogEvent::ProductUpdated {
			product: product.clone(),
		});
		Ok(product)
	}

	/// Removes a product. Orders already placed keep their line items.
	#[instrument(skip_all, fields(product_id = %truncate_id(product_id)))]
	pub async fn delete_product(&self, actor: &Actor, product_id: &str) -> Result<(), LifecycleError> {
		require_scope(actor, Scope::ProductsManage)?;
		let namespace = StorageKey::Products.as_str();
		let mut tx = self.storage.begin();
		let _: Product = tx
			.retrieve_for_update(namespace, product_id)
			.await
			.map_err(|e| not_found(e, "product", product_id))?;
		tx.delete(namespace, product_id);
		tx.commit().await?;

		tracing::info!("Product removed");
		self.publish(CatalogEvent::ProductRemoved {
			product_id: product_id.to_string(),
		});
		Ok(())
	}

	/// Changes the catalog price. Orders already placed keep their price.
	#[instrument(skip_all, fields(product_id = %truncate_id(product_id)))]
	pub async fn update_price(
		&self,
		actor: &Actor,
		product_id: &str,
		price: Decimal,
	) -> Result<Product, LifecycleError> {
		require_scope(actor, Scope::ProductsManage)?;
		validate_price(price)?;

		let product = self
			.modify(product_id, |product| {
				product.price = price;
				Ok(())
			})
			.await?;

		tracing::info!(price = %price, "Price changed");
		self.publish(CatalogEvent::PriceChanged {
			product_id: product.id.clone(),
			price,
		});
		Ok(product)
	}

	#[instrument(skip_all, fields(product_id = %truncate_id(product_id)))]
	pub async fn restock(
		&self,
		actor: &Actor,
		product_id: &str,
		quantity: u32,
	) -> Result<Product, LifecycleError> {
		require_scope(actor, Scope::ProductsManage)?;
		if quantity == 0 {
			return Err(LifecycleError::Validation("Restock quantity must be positive".into()));
		}

		let product = self
			.modify(product_id, |product| {
				product.stock = product.stock.checked_add(quantity).ok_or_else(|| {
					LifecycleError::Validation("Stock would overflow".into())
				})?;
				Ok(())
			})
			.await?;

		tracing::info!(stock = product.stock, "Product restocked");
		self.publish(CatalogEvent::Restocked {
			product_id: product.id.clone(),
			stock: product.stock,
		});
		Ok(product)
	}

	async fn modify<F>(&self, product_id: &str, change: F) -> Result<Product, LifecycleError>
	where
		F: FnOnce(&mut Product) -> Result<(), LifecycleError>,
	{
		let namespace = StorageKey::Products.as_str();
		let mut tx = self.storage.begin();
		let mut product: Product = tx
			.retrieve_for_update(namespace, product_id)
			.await
			.map_err(|e| not_found(e, "product", product_id))?;
		change(&mut product)?;
		tx.update(namespace, product_id, &product)?;
		tx.commit().await?;
		Ok(product)
	}

	/// Locks the store row and checks the store exists.
	async fn lock_store(&self, tx: &mut Transaction, store_id: &str) -> Result<(), LifecycleError> {
		let _: Store = tx
			.retrieve_for_update(StorageKey::Stores.as_str(), store_id)
			.await
			.map_err(|e| not_found(e, "store", store_id))?;
		Ok(())
	}

	fn publish(&self, event: CatalogEvent) {
		self.event_bus.publish(MarketplaceEvent::Catalog(event)).ok();
	}
}

fn required_name(name: String, what: &str) -> Result<String, LifecycleError> {
	let trimmed = name.trim();
	if trimmed.is_empty() {
		return Err(LifecycleError::Validation(format!("{} name must not be empty", what)));
	}
	Ok(trimmed.to_string())
}

/// Highest accepted unit price. Keeps order totals far from `Decimal::MAX`.
pub const MAX_PRICE: Decimal = Decimal::from_parts(1_000_000, 0, 0, false, 0);

fn validate_price(price: Decimal) -> Result<(), LifecycleError> {
	if price <= Decimal::ZERO {
		return Err(LifecycleError::Validation(format!(
			"Price must be positive, got {}",
			price
		)));
	}
	if price > MAX_PRICE {
		return Err(LifecycleError::Validation(format!(
			"Price must not exceed {}, got {}",
			MAX_PRICE, price
		)));
	}
	Ok(())
}

fn not_found(e: StorageError, what: &str, id: &str) -> LifecycleError {
	match e {
		StorageError::NotFound => LifecycleError::NotFound(format!("{} {}", what, id)),
		other => other.into(),
	}
}
