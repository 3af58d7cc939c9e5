use super::resource_id;

resource_id! {
    /// API Management service
    ApiManagementServiceId,
    "API Management Service",
    "/subscriptions/{subscription_id}/resourceGroups/{resource_group_name}/providers/Microsoft.ApiManagement/service/{service_name}" {
        subscription_id,
        resource_group_name,
        service_name,
    }
}

resource_id! {
    /// API within a service; `api_id` may carry a revision suffix (`name;rev=2`)
    ApiManagementApiId,
    "API Management API",
    "/subscriptions/{subscription_id}/resourceGroups/{resource_group_name}/providers/Microsoft.ApiManagement/service/{service_name}/apis/{api_id}" {
        subscription_id,
        resource_group_name,
        service_name,
        api_id,
    }
}

resource_id! {
    ApiManagementBackendId,
    "API Management Backend",
    "/subscriptions/{subscription_id}/resourceGroups/{resource_group_name}/providers/Microsoft.ApiManagement/service/{service_name}/backends/{backend_name}" {
        subscription_id,
        resource_group_name,
        service_name,
        backend_name,
    }
}

resource_id! {
    /// Soft-deleted API Management service
    DeletedServiceId,
    "Deleted API Management Service",
    "/subscriptions/{subscription_id}/providers/Microsoft.ApiManagement/locations/{location}/deletedServices/{service_name}" {
        subscription_id,
        location,
        service_name,
    }
}

impl ApiManagementServiceId {
    pub fn api(&self, api_id: impl Into<String>) -> ApiManagementApiId {
        ApiManagementApiId::new(
            &self.subscription_id,
            &self.resource_group_name,
            &self.service_name,
            api_id,
        )
    }
}

impl ApiManagementApiId {
    /// API name without the revision suffix
    pub fn api_name(&self) -> &str {
        self.api_id.split(';').next().unwrap_or(&self.api_id)
    }

    /// Revision from a `name;rev=N` API ID
    pub fn revision(&self) -> Option<&str> {
        self.api_id
            .split(';')
            .skip(1)
            .find_map(|part| part.strip_prefix("rev="))
    }

    pub fn service_id(&self) -> ApiManagementServiceId {
        ApiManagementServiceId::new(
            &self.subscription_id,
            &self.resource_group_name,
            &self.service_name,
        )
    }
}
