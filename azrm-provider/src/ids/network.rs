use super::resource_id;

resource_id! {
    ResourceGroupId,
    "Resource Group",
    "/subscriptions/{subscription_id}/resourceGroups/{resource_group_name}" {
        subscription_id,
        resource_group_name,
    }
}

resource_id! {
    VirtualNetworkId,
    "Virtual Network",
    "/subscriptions/{subscription_id}/resourceGroups/{resource_group_name}/providers/Microsoft.Network/virtualNetworks/{virtual_network_name}" {
        subscription_id,
        resource_group_name,
        virtual_network_name,
    }
}

resource_id! {
    PrivateDnsZoneId,
    "Private DNS Zone",
    "/subscriptions/{subscription_id}/resourceGroups/{resource_group_name}/providers/Microsoft.Network/privateDnsZones/{private_dns_zone_name}" {
        subscription_id,
        resource_group_name,
        private_dns_zone_name,
    }
}

resource_id! {
    /// Record set in a Private DNS zone; `record_type` is one of A, AAAA, CNAME, MX, PTR, SRV, TXT
    PrivateDnsRecordId,
    "Private DNS Record",
    "/subscriptions/{subscription_id}/resourceGroups/{resource_group_name}/providers/Microsoft.Network/privateDnsZones/{private_dns_zone_name}/{record_type}/{relative_record_set_name}" {
        subscription_id,
        resource_group_name,
        private_dns_zone_name,
        record_type,
        relative_record_set_name,
    }
}

resource_id! {
    VirtualNetworkLinkId,
    "Virtual Network Link",
    "/subscriptions/{subscription_id}/resourceGroups/{resource_group_name}/providers/Microsoft.Network/privateDnsZones/{private_dns_zone_name}/virtualNetworkLinks/{virtual_network_link_name}" {
        subscription_id,
        resource_group_name,
        private_dns_zone_name,
        virtual_network_link_name,
    }
}

impl PrivateDnsZoneId {
    pub fn record(
        &self,
        record_type: impl Into<String>,
        name: impl Into<String>,
    ) -> PrivateDnsRecordId {
        PrivateDnsRecordId::new(
            &self.subscription_id,
            &self.resource_group_name,
            &self.private_dns_zone_name,
            record_type,
            name,
        )
    }
}
